//! Message template: the application-facing send facade

use crate::config::is_blank;
use crate::error::MqBindError;
use crate::message::{build_message, Message, Payload, SendReceipt};
use crate::metrics::{SendMetrics, Timer};
use crate::producer::ProducerHandle;
use crate::sdk::Transaction;
use crate::transaction::TransactionalProducerRegistry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Name of the template every runtime creates
pub const DEFAULT_TEMPLATE_NAME: &str = "messageTemplate";

/// Sends normal, delayed, ordered and transactional messages.
///
/// Plain sends go through the default producer; transactional sends are routed
/// by `(topic, tag)` through the shared [`TransactionalProducerRegistry`].
#[derive(Debug)]
pub struct MessageTemplate {
    producer: Arc<ProducerHandle>,
    transactions: Arc<TransactionalProducerRegistry>,
    metrics: Arc<SendMetrics>,
}

impl MessageTemplate {
    pub fn new(
        producer: Arc<ProducerHandle>,
        transactions: Arc<TransactionalProducerRegistry>,
    ) -> Self {
        Self {
            producer,
            transactions,
            metrics: Arc::new(SendMetrics::default()),
        }
    }

    pub fn producer(&self) -> &Arc<ProducerHandle> {
        &self.producer
    }

    pub fn transactions(&self) -> &Arc<TransactionalProducerRegistry> {
        &self.transactions
    }

    pub fn metrics(&self) -> Arc<SendMetrics> {
        self.metrics.clone()
    }

    /// Send a message for immediate delivery
    pub async fn send_normal<P: Into<Payload>>(
        &self,
        topic: &str,
        payload: P,
        tag: Option<&str>,
        keys: &[&str],
    ) -> Result<SendReceipt, MqBindError> {
        let message = build_message(topic, payload, None, None, tag, keys)?;
        self.send(message).await
    }

    /// Send a message the broker holds back for `delay`
    pub async fn send_delay<P: Into<Payload>>(
        &self,
        topic: &str,
        payload: P,
        delay: Duration,
        tag: Option<&str>,
        keys: &[&str],
    ) -> Result<SendReceipt, MqBindError> {
        let message = build_message(topic, payload, None, Some(delay), tag, keys)?;
        self.send(message).await
    }

    /// Send a message ordered within `message_group`.
    ///
    /// A blank group is a `Configuration` error; it is never downgraded to a
    /// plain unordered send.
    pub async fn send_fifo<P: Into<Payload>>(
        &self,
        topic: &str,
        payload: P,
        message_group: &str,
        tag: Option<&str>,
        keys: &[&str],
    ) -> Result<SendReceipt, MqBindError> {
        if is_blank(message_group) {
            return Err(MqBindError::configuration(format!(
                "ordered send to topic '{}' requires a message group",
                topic
            )));
        }
        let message = build_message(topic, payload, Some(message_group), None, tag, keys)?;
        self.send(message).await
    }

    /// Open a transaction on the producer bound to `(topic, tag)`
    pub async fn begin_transaction(
        &self,
        topic: &str,
        tag: &str,
    ) -> Result<Box<dyn Transaction>, MqBindError> {
        let transaction = self.transactions.begin_transaction(topic, tag).await?;
        self.metrics.record_transaction_begun();
        Ok(transaction)
    }

    /// Send a half message inside `transaction`
    pub async fn send_transaction<P: Into<Payload>>(
        &self,
        transaction: &dyn Transaction,
        topic: &str,
        payload: P,
        tag: &str,
        keys: &[&str],
    ) -> Result<SendReceipt, MqBindError> {
        let message = build_message(topic, payload, None, None, Some(tag), keys)?;
        let size = message.body.len() as u64;
        let timer = Timer::start();

        let result = self
            .transactions
            .send_transactional(transaction, topic, tag, message)
            .await;
        self.observe(&result, size, timer);
        result
    }

    async fn send(&self, message: Message) -> Result<SendReceipt, MqBindError> {
        let size = message.body.len() as u64;
        let timer = Timer::start();
        let result = self.producer.send(message).await;
        self.observe(&result, size, timer);
        result
    }

    fn observe(&self, result: &Result<SendReceipt, MqBindError>, size: u64, timer: Timer) {
        match result {
            Ok(_) => self.metrics.record_send(size, timer.elapsed()),
            Err(e) => {
                self.metrics.record_send_error();
                debug!(error = %e, "Send failed");
            }
        }
    }

    /// Close the default producer. Failures are logged, not returned.
    pub async fn destroy(&self) {
        if let Err(e) = self.producer.close().await {
            warn!(error = %e, "Default producer close failed");
        }
    }
}
