//! Listener container: one push consumer bound to one message listener

use crate::config::{is_blank, non_blank_or, EndpointConfig, MqProperties};
use crate::error::MqBindError;
use crate::filter::{FilterExpression, SelectorKind, SUB_ALL};
use crate::message::MessageView;
use crate::metrics::ConsumeMetrics;
use crate::sdk::{
    ClientServiceProvider, ConsumeResult, MessageListener, PushConsumerClient,
    PushConsumerSettings,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Declarative subscription binding for one listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionDescriptor {
    pub topic: String,
    /// Tag expression, `*` by default
    pub tag: String,
    pub consumer_group: String,
    pub selector_kind: SelectorKind,
    pub instance_name: Option<String>,
    pub endpoints: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub request_timeout: Option<Duration>,
}

impl SubscriptionDescriptor {
    pub fn new<T: Into<String>, G: Into<String>>(topic: T, consumer_group: G) -> Self {
        Self {
            topic: topic.into(),
            tag: SUB_ALL.to_string(),
            consumer_group: consumer_group.into(),
            selector_kind: SelectorKind::Tag,
            instance_name: None,
            endpoints: None,
            access_key: None,
            secret_key: None,
            request_timeout: None,
        }
    }

    pub fn tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn selector_kind(mut self, kind: SelectorKind) -> Self {
        self.selector_kind = kind;
        self
    }

    pub fn instance_name<S: Into<String>>(mut self, name: S) -> Self {
        self.instance_name = Some(name.into());
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

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Descriptor overrides first, process-wide values otherwise
    pub fn resolve_endpoint(&self, defaults: &MqProperties) -> EndpointConfig {
        EndpointConfig::new(
            non_blank_or(self.endpoints.as_deref(), &defaults.endpoints),
            non_blank_or(self.access_key.as_deref(), &defaults.access_key),
            non_blank_or(self.secret_key.as_deref(), &defaults.secret_key),
        )
        .with_request_timeout(self.request_timeout.unwrap_or_else(|| defaults.request_timeout()))
    }
}

/// Lifecycle state of a [`ListenerContainer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Initialized,
    Running,
    Stopped,
    Destroyed,
}

impl ContainerState {
    pub fn can_start(&self) -> bool {
        matches!(self, ContainerState::Initialized | ContainerState::Stopped)
    }
}

/// Records each handler outcome in the container's metrics
struct InstrumentedListener {
    inner: Arc<dyn MessageListener>,
    metrics: Arc<ConsumeMetrics>,
}

#[async_trait]
impl MessageListener for InstrumentedListener {
    async fn consume(&self, message: MessageView) -> ConsumeResult {
        let size = message.body.len() as u64;
        let result = self.inner.consume(message).await;
        match result {
            ConsumeResult::Success => self.metrics.record_consumed(size),
            ConsumeResult::Failure => self.metrics.record_failure(),
        }
        result
    }
}

struct ContainerInner {
    state: ContainerState,
    consumer: Option<Box<dyn PushConsumerClient>>,
    filter: Option<FilterExpression>,
}

/// Owns one push consumer and its start/stop/destroy lifecycle.
///
/// `Created → Initialized → Running ⇄ Stopped → Destroyed`
pub struct ListenerContainer {
    id: String,
    descriptor: SubscriptionDescriptor,
    endpoint: EndpointConfig,
    listener: Arc<dyn MessageListener>,
    provider: Arc<dyn ClientServiceProvider>,
    metrics: Arc<ConsumeMetrics>,
    running: AtomicBool,
    inner: Mutex<ContainerInner>,
}

impl ListenerContainer {
    pub fn new<S: Into<String>>(
        id: S,
        descriptor: SubscriptionDescriptor,
        endpoint: EndpointConfig,
        listener: Arc<dyn MessageListener>,
        provider: Arc<dyn ClientServiceProvider>,
    ) -> Self {
        Self {
            id: id.into(),
            descriptor,
            endpoint,
            listener,
            provider,
            metrics: Arc::new(ConsumeMetrics::default()),
            running: AtomicBool::new(false),
            inner: Mutex::new(ContainerInner {
                state: ContainerState::Created,
                consumer: None,
                filter: None,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn descriptor(&self) -> &SubscriptionDescriptor {
        &self.descriptor
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    pub fn metrics(&self) -> Arc<ConsumeMetrics> {
        self.metrics.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub async fn state(&self) -> ContainerState {
        self.inner.lock().await.state
    }

    /// Filter in effect while running
    pub async fn filter_expression(&self) -> Option<FilterExpression> {
        self.inner.lock().await.filter.clone()
    }

    /// Check required settings: `Created → Initialized`
    pub async fn validate(&self) -> Result<(), MqBindError> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            ContainerState::Created => {}
            ContainerState::Initialized => return Ok(()),
            state => {
                return Err(MqBindError::illegal_state(format!(
                    "cannot validate container {} in state {:?}",
                    self.id, state
                )))
            }
        }

        if is_blank(&self.descriptor.consumer_group) {
            return Err(MqBindError::configuration(format!(
                "consumer group is required for container {}",
                self.id
            )));
        }
        if is_blank(&self.descriptor.topic) {
            return Err(MqBindError::configuration(format!(
                "topic is required for container {}",
                self.id
            )));
        }
        self.endpoint.validate()?;

        inner.state = ContainerState::Initialized;
        debug!(container = %self.id, "Container initialized");
        Ok(())
    }

    /// Build the push consumer and begin delivery: `Initialized | Stopped → Running`
    pub async fn start(&self) -> Result<(), MqBindError> {
        let mut inner = self.inner.lock().await;
        if inner.state == ContainerState::Running {
            return Err(MqBindError::illegal_state(format!(
                "container already running: {}",
                self
            )));
        }
        if !inner.state.can_start() {
            return Err(MqBindError::illegal_state(format!(
                "cannot start container {} from state {:?}",
                self.id, inner.state
            )));
        }

        let filter = FilterExpression::new(&self.descriptor.tag, self.descriptor.selector_kind);
        let settings = PushConsumerSettings {
            client: self.endpoint.client_configuration(),
            consumer_group: self.descriptor.consumer_group.clone(),
            subscriptions: HashMap::from([(self.descriptor.topic.clone(), filter.clone())]),
            listener: Arc::new(InstrumentedListener {
                inner: self.listener.clone(),
                metrics: self.metrics.clone(),
            }),
            instance_name: self.descriptor.instance_name.clone(),
        };

        let consumer = self.provider.build_push_consumer(settings).await?;

        inner.consumer = Some(consumer);
        inner.filter = Some(filter);
        inner.state = ContainerState::Running;
        self.running.store(true, Ordering::Release);

        info!(container = %self, "Running container");
        Ok(())
    }

    /// Close the push consumer: `Running → Stopped`. No-op otherwise.
    ///
    /// A failed close is returned and leaves the container running.
    pub async fn stop(&self) -> Result<(), MqBindError> {
        let mut inner = self.inner.lock().await;
        if inner.state != ContainerState::Running {
            return Ok(());
        }

        if let Some(consumer) = inner.consumer.as_ref() {
            consumer.close().await.map_err(|e| {
                MqBindError::close(format!("consumer of container {}: {}", self.id, e))
            })?;
        }

        inner.consumer = None;
        inner.state = ContainerState::Stopped;
        self.running.store(false, Ordering::Release);

        info!(container = %self.id, "Container stopped");
        Ok(())
    }

    /// Stop, then invoke `callback` whether or not the close succeeded
    pub async fn stop_with<F>(&self, callback: F) -> Result<(), MqBindError>
    where
        F: FnOnce() + Send,
    {
        let result = self.stop().await;
        callback();
        result
    }

    /// Final cleanup. Closes the consumer if one is open; repeat calls are no-ops.
    pub async fn destroy(&self) -> Result<(), MqBindError> {
        let mut inner = self.inner.lock().await;
        if inner.state == ContainerState::Destroyed {
            return Ok(());
        }

        inner.state = ContainerState::Destroyed;
        inner.filter = None;
        self.running.store(false, Ordering::Release);

        if let Some(consumer) = inner.consumer.take() {
            if let Err(e) = consumer.close().await {
                warn!(container = %self.id, error = %e, "Consumer close failed during destroy");
                return Err(MqBindError::close(format!(
                    "consumer of container {}: {}",
                    self.id, e
                )));
            }
        }

        info!(container = %self.id, "Container destroyed");
        Ok(())
    }
}

impl fmt::Display for ListenerContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ListenerContainer{{id={}, group={}, topic={}, tag={}, endpoints={}}}",
            self.id,
            self.descriptor.consumer_group,
            self.descriptor.topic,
            self.descriptor.tag,
            self.endpoint.endpoints
        )
    }
}

impl fmt::Debug for ListenerContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerContainer")
            .field("id", &self.id)
            .field("descriptor", &self.descriptor)
            .field("endpoint", &self.endpoint)
            .field("running", &self.is_running())
            .finish()
    }
}
