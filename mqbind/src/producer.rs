//! Producer handle for sending messages through the broker SDK

use crate::config::EndpointConfig;
use crate::error::MqBindError;
use crate::message::{Message, SendReceipt};
use crate::sdk::{
    ClientServiceProvider, ProducerClient, ProducerSettings, Transaction, TransactionChecker,
};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Long-lived outbound channel to the broker.
///
/// Safe to share between tasks; the SDK producer carries all connection state.
pub struct ProducerHandle {
    endpoint: EndpointConfig,
    topics: Vec<String>,
    transactional: bool,
    client: Arc<dyn ProducerClient>,
    closed: AtomicBool,
}

impl ProducerHandle {
    /// Validate the endpoint and ask the SDK for a producer
    pub async fn new(
        provider: &dyn ClientServiceProvider,
        endpoint: EndpointConfig,
        topics: Vec<String>,
        checker: Option<Arc<dyn TransactionChecker>>,
    ) -> Result<Self, MqBindError> {
        endpoint.validate()?;

        let transactional = checker.is_some();
        let settings = ProducerSettings {
            client: endpoint.client_configuration(),
            topics: topics.clone(),
            checker,
        };
        let client = provider.build_producer(settings).await?;

        info!(
            endpoints = %endpoint.endpoints,
            topics = ?topics,
            transactional,
            "Producer started"
        );

        Ok(Self {
            endpoint,
            topics,
            transactional,
            client,
            closed: AtomicBool::new(false),
        })
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    /// Topics declared at construction
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Whether a transaction checker is bound
    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Send a single message and wait for the broker acknowledgement
    pub async fn send(&self, message: Message) -> Result<SendReceipt, MqBindError> {
        self.ensure_open()?;
        let topic = message.topic.clone();
        let receipt = self.client.send(message).await?;
        debug!(topic = %topic, message_id = %receipt.message_id, "Message sent");
        Ok(receipt)
    }

    /// Send a half message inside an open transaction
    pub async fn send_transactional(
        &self,
        message: Message,
        transaction: &dyn Transaction,
    ) -> Result<SendReceipt, MqBindError> {
        self.ensure_open()?;
        let topic = message.topic.clone();
        let receipt = self.client.send_in_transaction(message, transaction).await?;
        debug!(
            topic = %topic,
            message_id = %receipt.message_id,
            transaction_id = %transaction.id(),
            "Transactional message sent"
        );
        Ok(receipt)
    }

    pub async fn begin_transaction(&self) -> Result<Box<dyn Transaction>, MqBindError> {
        self.ensure_open()?;
        let transaction = self.client.begin_transaction().await?;
        debug!(transaction_id = %transaction.id(), "Transaction begun");
        Ok(transaction)
    }

    /// Close the producer and release resources. Closing twice is a no-op.
    pub async fn close(&self) -> Result<(), MqBindError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.client
            .close()
            .await
            .map_err(|e| MqBindError::close(format!("producer for {}: {}", self.endpoint.endpoints, e)))?;
        info!(endpoints = %self.endpoint.endpoints, "Producer closed");
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), MqBindError> {
        if self.is_closed() {
            return Err(MqBindError::illegal_state("producer is closed"));
        }
        Ok(())
    }
}

impl fmt::Debug for ProducerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerHandle")
            .field("endpoint", &self.endpoint)
            .field("topics", &self.topics)
            .field("transactional", &self.transactional)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Builder for ProducerHandle
#[derive(Default)]
pub struct ProducerBuilder {
    endpoint: Option<EndpointConfig>,
    topics: Vec<String>,
    checker: Option<Arc<dyn TransactionChecker>>,
}

impl ProducerBuilder {
    /// Create a new producer builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the endpoint configuration
    pub fn endpoint(mut self, endpoint: EndpointConfig) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Set the topics checked by the broker when the producer is built
    pub fn topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    /// Bind a transaction checker, making the producer transactional
    pub fn transaction_checker(mut self, checker: Arc<dyn TransactionChecker>) -> Self {
        self.checker = Some(checker);
        self
    }

    /// Build the producer
    pub async fn build(
        self,
        provider: &dyn ClientServiceProvider,
    ) -> Result<ProducerHandle, MqBindError> {
        let endpoint = self
            .endpoint
            .ok_or_else(|| MqBindError::configuration("endpoint configuration is required"))?;
        ProducerHandle::new(provider, endpoint, self.topics, self.checker).await
    }
}
