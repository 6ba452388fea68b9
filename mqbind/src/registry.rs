//! Listener container registry
//!
//! Hosts enumerate their handlers and register each one here. Every handler
//! gets its own container, identified by a process-unique name, and is started
//! right away.

use crate::config::MqProperties;
use crate::container::{ListenerContainer, SubscriptionDescriptor};
use crate::error::MqBindError;
use crate::sdk::{ClientServiceProvider, MessageListener};
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Prefix of every container identity
pub const CONTAINER_ID_PREFIX: &str = "ListenerContainer";

pub struct ListenerContainerRegistry {
    provider: Arc<dyn ClientServiceProvider>,
    defaults: MqProperties,
    counter: AtomicU64,
    containers: DashMap<String, Arc<ListenerContainer>>,
}

impl ListenerContainerRegistry {
    pub fn new(provider: Arc<dyn ClientServiceProvider>, defaults: MqProperties) -> Self {
        Self {
            provider,
            defaults,
            counter: AtomicU64::new(0),
            containers: DashMap::new(),
        }
    }

    fn next_container_id(&self) -> String {
        format!(
            "{}_{}",
            CONTAINER_ID_PREFIX,
            self.counter.fetch_add(1, Ordering::Relaxed) + 1
        )
    }

    /// Create, validate and start a container for `handler`.
    ///
    /// Any failure is wrapped as [`MqBindError::Startup`] and the container is
    /// discarded; containers registered earlier keep running.
    pub async fn register_container(
        &self,
        handler_name: &str,
        handler: Arc<dyn MessageListener>,
        descriptor: SubscriptionDescriptor,
    ) -> Result<Arc<ListenerContainer>, MqBindError> {
        let container_id = self.next_container_id();
        let endpoint = descriptor.resolve_endpoint(&self.defaults);
        let container = Arc::new(ListenerContainer::new(
            container_id.clone(),
            descriptor,
            endpoint,
            handler,
            self.provider.clone(),
        ));

        if let Err(e) = self.validate_and_start(&container).await {
            error!(container = %container, error = %e, "Container failed to start");
            if let Err(destroy_err) = container.destroy().await {
                warn!(container = %container_id, error = %destroy_err, "Cleanup after failed start failed");
            }
            return Err(MqBindError::startup(container_id, e));
        }

        self.containers.insert(container_id.clone(), container.clone());
        info!(
            listener = %handler_name,
            container = %container_id,
            "Registered listener to container"
        );
        Ok(container)
    }

    async fn validate_and_start(&self, container: &ListenerContainer) -> Result<(), MqBindError> {
        container.validate().await?;
        if !container.is_running() {
            container.start().await?;
        }
        Ok(())
    }

    pub fn get(&self, container_id: &str) -> Option<Arc<ListenerContainer>> {
        self.containers.get(container_id).map(|entry| entry.value().clone())
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.containers.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<ListenerContainer>> {
        self.containers.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Start every container that is not running. Returns the failures.
    pub async fn start_all(&self) -> Vec<(String, MqBindError)> {
        let mut failures = Vec::new();
        for container in self.snapshot() {
            if container.is_running() {
                continue;
            }
            if let Err(e) = container.start().await {
                error!(container = %container.id(), error = %e, "Container start failed");
                failures.push((container.id().to_string(), e));
            }
        }
        failures
    }

    /// Stop every container concurrently and wait until all have completed.
    ///
    /// Returns the failures; the remaining containers are stopped regardless.
    pub async fn stop_all(&self) -> Vec<(String, MqBindError)> {
        let containers = self.snapshot();
        let completed = AtomicUsize::new(0);

        let results = join_all(containers.iter().map(|container| {
            let completed = &completed;
            async move {
                let result = container
                    .stop_with(|| {
                        completed.fetch_add(1, Ordering::Relaxed);
                    })
                    .await;
                (container.id().to_string(), result)
            }
        }))
        .await;

        info!(
            completed = completed.load(Ordering::Relaxed),
            total = containers.len(),
            "Containers stopped"
        );
        Self::collect_failures(results)
    }

    /// Destroy and forget every container
    pub async fn destroy_all(&self) -> Vec<(String, MqBindError)> {
        let containers = self.snapshot();
        self.containers.clear();

        let results = join_all(containers.iter().map(|container| async move {
            (container.id().to_string(), container.destroy().await)
        }))
        .await;
        Self::collect_failures(results)
    }

    fn collect_failures(
        results: Vec<(String, Result<(), MqBindError>)>,
    ) -> Vec<(String, MqBindError)> {
        results
            .into_iter()
            .filter_map(|(id, result)| match result {
                Ok(()) => None,
                Err(e) => {
                    warn!(container = %id, error = %e, "Container shutdown failed");
                    Some((id, e))
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageView;
    use crate::sdk::loopback::LoopbackProvider;
    use crate::sdk::ConsumeResult;
    use async_trait::async_trait;
    use std::collections::HashSet;

    struct Noop;

    #[async_trait]
    impl MessageListener for Noop {
        async fn consume(&self, _message: MessageView) -> ConsumeResult {
            ConsumeResult::Success
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

    fn registry(provider: &LoopbackProvider) -> ListenerContainerRegistry {
        ListenerContainerRegistry::new(Arc::new(provider.clone()), defaults())
    }

    #[tokio::test]
    async fn test_register_starts_container() {
        let provider = LoopbackProvider::new();
        let registry = registry(&provider);

        let container = registry
            .register_container("orderListener", Arc::new(Noop), SubscriptionDescriptor::new("orders", "g"))
            .await
            .unwrap();

        assert_eq!(container.id(), "ListenerContainer_1");
        assert!(container.is_running());
        assert_eq!(container.endpoint().endpoints, "127.0.0.1:8081");
        assert_eq!(provider.active_consumers(), 1);
        assert_eq!(registry.ids(), vec!["ListenerContainer_1"]);
    }

    #[tokio::test]
    async fn test_container_ids_unique_under_concurrency() {
        let provider = LoopbackProvider::new();
        let registry = Arc::new(registry(&provider));

        let mut tasks = Vec::new();
        for i in 0..8 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry
                    .register_container(
                        &format!("listener{}", i),
                        Arc::new(Noop),
                        SubscriptionDescriptor::new("orders", format!("g{}", i)),
                    )
                    .await
                    .map(|c| c.id().to_string())
            }));
        }

        let mut ids = HashSet::new();
        for task in tasks {
            ids.insert(task.await.unwrap().unwrap());
        }
        assert_eq!(ids.len(), 8);
        assert_eq!(registry.len(), 8);
    }

    #[tokio::test]
    async fn test_failed_start_is_wrapped_and_isolated() {
        let provider = LoopbackProvider::new().with_credentials("ak", "sk");
        let registry = registry(&provider);

        let rejected = registry
            .register_container(
                "bad",
                Arc::new(Noop),
                SubscriptionDescriptor::new("orders", "g").access_key("wrong"),
            )
            .await;
        match rejected {
            Err(MqBindError::Startup { container, source }) => {
                assert_eq!(container, "ListenerContainer_1");
                assert!(matches!(*source, MqBindError::Client(_)));
            }
            other => panic!("expected startup error, got {:?}", other),
        }
        assert!(registry.is_empty());

        let good = registry
            .register_container("good", Arc::new(Noop), SubscriptionDescriptor::new("orders", "g"))
            .await
            .unwrap();
        assert_eq!(good.id(), "ListenerContainer_2");
        assert_eq!(provider.active_consumers(), 1);
    }

    #[tokio::test]
    async fn test_missing_group_is_startup_configuration_error() {
        let provider = LoopbackProvider::new();
        let registry = registry(&provider);

        let result = registry
            .register_container("l", Arc::new(Noop), SubscriptionDescriptor::new("orders", ""))
            .await;
        let err = result.unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(provider.sdk_calls(), 0);
    }

    #[tokio::test]
    async fn test_bulk_stop_start_destroy() {
        let provider = LoopbackProvider::new();
        let registry = registry(&provider);
        for group in ["a", "b", "c"] {
            registry
                .register_container(group, Arc::new(Noop), SubscriptionDescriptor::new("orders", group))
                .await
                .unwrap();
        }
        assert_eq!(provider.active_consumers(), 3);

        assert!(registry.stop_all().await.is_empty());
        assert_eq!(provider.active_consumers(), 0);

        assert!(registry.start_all().await.is_empty());
        assert_eq!(provider.active_consumers(), 3);

        assert!(registry.destroy_all().await.is_empty());
        assert_eq!(provider.active_consumers(), 0);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_stop_all_reports_failures() {
        let provider = LoopbackProvider::new();
        let registry = registry(&provider);
        registry
            .register_container("a", Arc::new(Noop), SubscriptionDescriptor::new("orders", "a"))
            .await
            .unwrap();

        provider.set_consumer_close_failure(true);
        let failures = registry.stop_all().await;
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0].1, MqBindError::Close { .. }));
    }
}
