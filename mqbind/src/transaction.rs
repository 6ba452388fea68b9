//! Transactional producer registry
//!
//! Each `(topic, tag)` pair may be bound to exactly one producer carrying a
//! transaction checker. The facade routes `begin_transaction` and
//! `send_transaction` through this registry; a missing binding is a
//! configuration defect and never falls back to the default producer.
//!
//! Keys are structured pairs. Their display form `topic_tag` matches the
//! string keys older deployments used, but two pairs that render to the same
//! string (`a_b`/`c` and `a`/`b_c`) stay distinct here.

use crate::config::{is_blank, non_blank_or, EndpointConfig, MqProperties};
use crate::error::MqBindError;
use crate::message::{Message, SendReceipt};
use crate::producer::ProducerHandle;
use crate::sdk::{ClientServiceProvider, Transaction, TransactionChecker};
use crate::template::DEFAULT_TEMPLATE_NAME;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Registry key for a transactional binding
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    pub topic: String,
    pub tag: String,
}

impl TransactionKey {
    pub fn new<T: Into<String>, G: Into<String>>(topic: T, tag: G) -> Self {
        Self {
            topic: topic.into(),
            tag: tag.into(),
        }
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.topic, self.tag)
    }
}

/// Declarative binding of a transaction checker to a `(topic, tag)` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionalDescriptor {
    pub topic: String,
    pub tag: String,
    /// Template the binding is declared against
    pub template_name: String,
    pub endpoints: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

impl TransactionalDescriptor {
    pub fn new<T: Into<String>, G: Into<String>>(topic: T, tag: G) -> Self {
        Self {
            topic: topic.into(),
            tag: tag.into(),
            template_name: DEFAULT_TEMPLATE_NAME.to_string(),
            endpoints: None,
            access_key: None,
            secret_key: None,
        }
    }

    pub fn template_name<S: Into<String>>(mut self, name: S) -> Self {
        self.template_name = name.into();
        self
    }

    pub fn endpoints<S: Into<String>>(mut self, endpoints: S) -> Self {
        self.endpoints = Some(endpoints.into());
        self
    }

    pub fn access_key<S: Into<String>>(mut self, access_key: S) -> Self {
        self.access_key = Some(access_key.into());
        self
    }

    pub fn secret_key<S: Into<String>>(mut self, secret_key: S) -> Self {
        self.secret_key = Some(secret_key.into());
        self
    }

    pub fn key(&self) -> TransactionKey {
        TransactionKey::new(self.topic.clone(), self.tag.clone())
    }

    /// Descriptor overrides first, process-wide values otherwise
    pub fn resolve_endpoint(&self, defaults: &MqProperties) -> EndpointConfig {
        EndpointConfig::new(
            non_blank_or(self.endpoints.as_deref(), &defaults.endpoints),
            non_blank_or(self.access_key.as_deref(), &defaults.access_key),
            non_blank_or(self.secret_key.as_deref(), &defaults.secret_key),
        )
        .with_request_timeout(defaults.request_timeout())
    }
}

/// Process-scoped map of transactional producers.
///
/// Registration is rare and exclusive; lookups share a read lock that is never
/// held across an await.
#[derive(Debug, Default)]
pub struct TransactionalProducerRegistry {
    producers: RwLock<HashMap<TransactionKey, Arc<ProducerHandle>>>,
}

impl TransactionalProducerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a producer to a key. The first registration wins.
    pub fn register(
        &self,
        key: TransactionKey,
        producer: Arc<ProducerHandle>,
    ) -> Result<(), MqBindError> {
        let mut producers = self.producers.write();
        if producers.contains_key(&key) {
            return Err(MqBindError::DuplicateRegistration { key });
        }
        info!(key = %key, "Transactional producer registered");
        producers.insert(key, producer);
        Ok(())
    }

    pub fn lookup(&self, key: &TransactionKey) -> Option<Arc<ProducerHandle>> {
        self.producers.read().get(key).cloned()
    }

    pub fn contains(&self, key: &TransactionKey) -> bool {
        self.producers.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.producers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.producers.read().is_empty()
    }

    pub fn keys(&self) -> Vec<TransactionKey> {
        self.producers.read().keys().cloned().collect()
    }

    fn require(&self, topic: &str, tag: &str) -> Result<Arc<ProducerHandle>, MqBindError> {
        let key = TransactionKey::new(topic, tag);
        self.lookup(&key)
            .ok_or(MqBindError::NotRegistered { key })
    }

    /// Open a transaction on the producer bound to `(topic, tag)`
    pub async fn begin_transaction(
        &self,
        topic: &str,
        tag: &str,
    ) -> Result<Box<dyn Transaction>, MqBindError> {
        let producer = self.require(topic, tag)?;
        producer.begin_transaction().await
    }

    /// Send a half message through the producer bound to `(topic, tag)`
    pub async fn send_transactional(
        &self,
        transaction: &dyn Transaction,
        topic: &str,
        tag: &str,
        message: Message,
    ) -> Result<SendReceipt, MqBindError> {
        let producer = self.require(topic, tag)?;
        producer.send_transactional(message, transaction).await
    }

    /// Build a producer carrying `checker` and bind it to the descriptor's key.
    ///
    /// A blank topic or tag and an occupied key are rejected before any
    /// producer is built.
    pub async fn register_checker(
        &self,
        provider: &dyn ClientServiceProvider,
        descriptor: &TransactionalDescriptor,
        checker: Arc<dyn TransactionChecker>,
        defaults: &MqProperties,
    ) -> Result<Arc<ProducerHandle>, MqBindError> {
        if is_blank(&descriptor.topic) || is_blank(&descriptor.tag) {
            return Err(MqBindError::configuration(format!(
                "transactional binding requires a topic and a tag, got '{}'",
                descriptor.key()
            )));
        }

        let key = descriptor.key();
        if self.contains(&key) {
            return Err(MqBindError::DuplicateRegistration { key });
        }

        let producer = Arc::new(
            ProducerHandle::new(
                provider,
                descriptor.resolve_endpoint(defaults),
                vec![descriptor.topic.clone()],
                Some(checker),
            )
            .await?,
        );

        // Lost a race with a concurrent registration of the same key
        if let Err(e) = self.register(key, producer.clone()) {
            if let Err(close_err) = producer.close().await {
                warn!(error = %close_err, "Failed to close surplus transactional producer");
            }
            return Err(e);
        }

        debug!(
            topic = %descriptor.topic,
            tag = %descriptor.tag,
            template = %descriptor.template_name,
            "Transaction checker bound"
        );
        Ok(producer)
    }

    /// Close and drop every registered producer. Close failures are logged.
    pub async fn teardown(&self) {
        let drained: Vec<(TransactionKey, Arc<ProducerHandle>)> =
            self.producers.write().drain().collect();

        for (key, producer) in drained {
            if let Err(e) = producer.close().await {
                warn!(key = %key, error = %e, "Transactional producer close failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{build_message, MessageView};
    use crate::sdk::loopback::LoopbackProvider;
    use crate::sdk::TransactionResolution;
    use async_trait::async_trait;

    struct AlwaysCommit;

    #[async_trait]
    impl TransactionChecker for AlwaysCommit {
        async fn check(&self, _message: &MessageView) -> TransactionResolution {
            TransactionResolution::Commit
        }
    }

    fn defaults() -> MqProperties {
        MqProperties {
            endpoints: "127.0.0.1:8081".to_string(),
            access_key: "ak".to_string(),
            secret_key: "sk".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_key_display_matches_legacy_format() {
        assert_eq!(TransactionKey::new("orders", "paid").to_string(), "orders_paid");
    }

    #[test]
    fn test_structured_keys_do_not_collide() {
        let a = TransactionKey::new("a_b", "c");
        let b = TransactionKey::new("a", "b_c");
        assert_eq!(a.to_string(), b.to_string());
        assert_ne!(a, b);
    }

    #[test]
    fn test_descriptor_overrides_defaults() {
        let descriptor = TransactionalDescriptor::new("orders", "paid")
            .endpoints("10.0.0.9:8081")
            .access_key("  ");
        let endpoint = descriptor.resolve_endpoint(&defaults());

        assert_eq!(endpoint.endpoints, "10.0.0.9:8081");
        assert_eq!(endpoint.access_key, "ak");
        assert_eq!(endpoint.secret_key, "sk");
        assert_eq!(descriptor.template_name, DEFAULT_TEMPLATE_NAME);
    }

    #[tokio::test]
    async fn test_duplicate_registration_keeps_first() {
        let provider = LoopbackProvider::new();
        let registry = TransactionalProducerRegistry::new();
        let descriptor = TransactionalDescriptor::new("orders", "paid");

        let first = registry
            .register_checker(&provider, &descriptor, Arc::new(AlwaysCommit), &defaults())
            .await
            .unwrap();
        let second = registry
            .register_checker(&provider, &descriptor, Arc::new(AlwaysCommit), &defaults())
            .await;

        assert!(matches!(second, Err(MqBindError::DuplicateRegistration { .. })));
        assert_eq!(provider.producers_built(), 1);
        assert!(!first.is_closed());

        let tx = registry.begin_transaction("orders", "paid").await.unwrap();
        let message = build_message("orders", "x", None, None, Some("paid"), &[]).unwrap();
        registry
            .send_transactional(tx.as_ref(), "orders", "paid", message)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(provider.published().len(), 1);
    }

    #[tokio::test]
    async fn test_blank_topic_or_tag_rejected() {
        let provider = LoopbackProvider::new();
        let registry = TransactionalProducerRegistry::new();

        for descriptor in [
            TransactionalDescriptor::new("", ""),
            TransactionalDescriptor::new("orders", " "),
            TransactionalDescriptor::new("  ", "paid"),
        ] {
            let result = registry
                .register_checker(&provider, &descriptor, Arc::new(AlwaysCommit), &defaults())
                .await;
            assert!(matches!(result, Err(MqBindError::Configuration { .. })));
        }
        assert_eq!(provider.producers_built(), 0);
        assert_eq!(provider.sdk_calls(), 0);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_begin_makes_no_sdk_call() {
        let provider = LoopbackProvider::new();
        let registry = TransactionalProducerRegistry::new();
        registry
            .register_checker(
                &provider,
                &TransactionalDescriptor::new("orders", "paid"),
                Arc::new(AlwaysCommit),
                &defaults(),
            )
            .await
            .unwrap();
        let calls = provider.sdk_calls();
        assert!(calls > 0);

        let result = registry.begin_transaction("orders", "refund").await;
        match result {
            Err(MqBindError::NotRegistered { key }) => {
                assert_eq!(key, TransactionKey::new("orders", "refund"))
            }
            other => panic!("expected NotRegistered, got {:?}", other.map(|_| ())),
        }
        assert_eq!(provider.sdk_calls(), calls);
    }

    #[tokio::test]
    async fn test_send_on_unregistered_tag_fails() {
        let provider = LoopbackProvider::new();
        let registry = TransactionalProducerRegistry::new();
        registry
            .register_checker(
                &provider,
                &TransactionalDescriptor::new("orders", "paid"),
                Arc::new(AlwaysCommit),
                &defaults(),
            )
            .await
            .unwrap();

        let tx = registry.begin_transaction("orders", "paid").await.unwrap();
        let message = build_message("orders", "x", None, None, Some("refund"), &[]).unwrap();
        let result = registry
            .send_transactional(tx.as_ref(), "orders", "refund", message)
            .await;
        assert!(matches!(result, Err(MqBindError::NotRegistered { .. })));
    }

    #[tokio::test]
    async fn test_teardown_closes_everything() {
        let provider = LoopbackProvider::new();
        let registry = TransactionalProducerRegistry::new();
        let producer = registry
            .register_checker(
                &provider,
                &TransactionalDescriptor::new("orders", "paid"),
                Arc::new(AlwaysCommit),
                &defaults(),
            )
            .await
            .unwrap();

        registry.teardown().await;
        assert!(registry.is_empty());
        assert!(producer.is_closed());
    }
}
