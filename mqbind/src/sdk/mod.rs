//! Broker SDK seam
//!
//! The broker's wire client is an opaque collaborator. These traits describe
//! the primitives mqbind needs from it: building producers and push consumers,
//! sending, two-phase transactions, and the callbacks the SDK invokes.
//! [`loopback`] provides an in-process implementation.

pub mod loopback;

use crate::filter::FilterExpression;
use crate::message::{Message, MessageView, SendReceipt};
use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Category of an SDK failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientErrorKind {
    /// Endpoint unreachable or connection dropped
    Network,
    /// Credentials rejected
    Unauthorized,
    /// Broker-side validation failed (unknown topic, bad filter, ...)
    BadRequest,
    /// Request timeout elapsed
    Timeout,
    /// Handle already closed
    Closed,
    /// Anything else
    Internal,
}

/// Error raised by the broker SDK
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Client error ({kind:?}): {message}")]
pub struct ClientError {
    pub kind: ClientErrorKind,
    pub message: String,
}

impl ClientError {
    pub fn new<S: Into<String>>(kind: ClientErrorKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::new(ClientErrorKind::Network, message)
    }

    pub fn unauthorized<S: Into<String>>(message: S) -> Self {
        Self::new(ClientErrorKind::Unauthorized, message)
    }

    pub fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::new(ClientErrorKind::BadRequest, message)
    }

    pub fn closed<S: Into<String>>(message: S) -> Self {
        Self::new(ClientErrorKind::Closed, message)
    }

    /// Check if this error is transient
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ClientErrorKind::Network | ClientErrorKind::Timeout)
    }
}

/// Access key / secret key pair
#[derive(Clone, PartialEq, Eq)]
pub struct StaticCredentials {
    pub access_key: String,
    pub secret_key: String,
}

impl StaticCredentials {
    pub fn new<A: Into<String>, S: Into<String>>(access_key: A, secret_key: S) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("access_key", &self.access_key)
            .finish_non_exhaustive()
    }
}

/// Connection settings shared by producers and consumers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfiguration {
    pub endpoints: String,
    pub credentials: StaticCredentials,
    pub request_timeout: Duration,
}

impl ClientConfiguration {
    pub fn builder() -> ClientConfigurationBuilder {
        ClientConfigurationBuilder::default()
    }
}

/// Builder for ClientConfiguration
#[derive(Debug)]
pub struct ClientConfigurationBuilder {
    endpoints: String,
    credentials: StaticCredentials,
    request_timeout: Duration,
}

impl Default for ClientConfigurationBuilder {
    fn default() -> Self {
        Self {
            endpoints: String::new(),
            credentials: StaticCredentials::new("", ""),
            request_timeout: Duration::from_secs(3),
        }
    }
}

impl ClientConfigurationBuilder {
    pub fn endpoints<S: Into<String>>(mut self, endpoints: S) -> Self {
        self.endpoints = endpoints.into();
        self
    }

    pub fn credentials(mut self, credentials: StaticCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn build(self) -> ClientConfiguration {
        ClientConfiguration {
            endpoints: self.endpoints,
            credentials: self.credentials,
            request_timeout: self.request_timeout,
        }
    }
}

/// Outcome reported by a [`TransactionChecker`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionResolution {
    Commit,
    Rollback,
    /// Ask again later
    Unknown,
}

/// Outcome reported by a [`MessageListener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeResult {
    Success,
    /// The SDK redelivers according to its retry policy
    Failure,
}

/// Callback the broker invokes for each delivered message.
#[async_trait]
pub trait MessageListener: Send + Sync {
    async fn consume(&self, message: MessageView) -> ConsumeResult;
}

/// Callback the broker invokes to resolve an in-doubt transactional message.
#[async_trait]
pub trait TransactionChecker: Send + Sync {
    async fn check(&self, message: &MessageView) -> TransactionResolution;
}

/// Opaque in-flight two-phase send
#[async_trait]
pub trait Transaction: Send + Sync {
    /// SDK-assigned transaction identifier
    fn id(&self) -> &str;

    async fn commit(&self) -> Result<(), ClientError>;

    async fn rollback(&self) -> Result<(), ClientError>;

    /// Lets the issuing SDK recover its concrete type
    fn as_any(&self) -> &dyn Any;
}

impl fmt::Debug for dyn Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction").field("id", &self.id()).finish()
    }
}

/// Outbound channel to the broker
#[async_trait]
pub trait ProducerClient: Send + Sync {
    async fn send(&self, message: Message) -> Result<SendReceipt, ClientError>;

    async fn send_in_transaction(
        &self,
        message: Message,
        transaction: &dyn Transaction,
    ) -> Result<SendReceipt, ClientError>;

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>, ClientError>;

    async fn close(&self) -> Result<(), ClientError>;
}

/// Push-style subscription; delivery stops once closed
#[async_trait]
pub trait PushConsumerClient: Send + Sync {
    fn consumer_group(&self) -> &str;

    async fn close(&self) -> Result<(), ClientError>;
}

/// Settings for building a producer
#[derive(Clone)]
pub struct ProducerSettings {
    pub client: ClientConfiguration,
    pub topics: Vec<String>,
    pub checker: Option<Arc<dyn TransactionChecker>>,
}

impl fmt::Debug for ProducerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerSettings")
            .field("client", &self.client)
            .field("topics", &self.topics)
            .field("transactional", &self.checker.is_some())
            .finish()
    }
}

/// Settings for building a push consumer
#[derive(Clone)]
pub struct PushConsumerSettings {
    pub client: ClientConfiguration,
    pub consumer_group: String,
    pub subscriptions: HashMap<String, FilterExpression>,
    pub listener: Arc<dyn MessageListener>,
    pub instance_name: Option<String>,
}

impl fmt::Debug for PushConsumerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushConsumerSettings")
            .field("client", &self.client)
            .field("consumer_group", &self.consumer_group)
            .field("subscriptions", &self.subscriptions)
            .field("instance_name", &self.instance_name)
            .finish()
    }
}

/// Entry point of the broker SDK
#[async_trait]
pub trait ClientServiceProvider: Send + Sync {
    async fn build_producer(
        &self,
        settings: ProducerSettings,
    ) -> Result<Arc<dyn ProducerClient>, ClientError>;

    async fn build_push_consumer(
        &self,
        settings: PushConsumerSettings,
    ) -> Result<Box<dyn PushConsumerClient>, ClientError>;
}
