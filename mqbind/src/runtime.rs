//! Runtime bootstrap
//!
//! Wires the process-wide pieces together from [`MqProperties`]: the default
//! producer and template, the shared transactional registry and the listener
//! container registry. Hosts call the `register_*` methods for each handler or
//! checker they own, and [`MessagingRuntime::shutdown`] once on exit.

use crate::config::MqProperties;
use crate::container::{ListenerContainer, SubscriptionDescriptor};
use crate::error::MqBindError;
use crate::producer::ProducerBuilder;
use crate::registry::ListenerContainerRegistry;
use crate::sdk::{ClientServiceProvider, MessageListener, TransactionChecker};
use crate::template::{MessageTemplate, DEFAULT_TEMPLATE_NAME};
use crate::transaction::{TransactionalDescriptor, TransactionalProducerRegistry};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub struct MessagingRuntime {
    properties: MqProperties,
    provider: Arc<dyn ClientServiceProvider>,
    transactions: Arc<TransactionalProducerRegistry>,
    containers: ListenerContainerRegistry,
    templates: RwLock<HashMap<String, Arc<MessageTemplate>>>,
}

impl MessagingRuntime {
    /// Build the runtime, or `None` when no endpoints are configured
    pub async fn bootstrap(
        properties: MqProperties,
        provider: Arc<dyn ClientServiceProvider>,
    ) -> Result<Option<Self>, MqBindError> {
        if !properties.has_endpoints() {
            warn!("No endpoints configured, messaging runtime not started");
            return Ok(None);
        }

        let endpoint = properties.endpoint_config();
        endpoint.validate()?;

        let producer = ProducerBuilder::new()
            .endpoint(endpoint)
            .topics(properties.topic_list())
            .build(provider.as_ref())
            .await?;

        let transactions = Arc::new(TransactionalProducerRegistry::new());
        let template = Arc::new(MessageTemplate::new(
            Arc::new(producer),
            transactions.clone(),
        ));

        let mut templates = HashMap::new();
        templates.insert(DEFAULT_TEMPLATE_NAME.to_string(), template);

        info!(endpoints = %properties.endpoints, "Messaging runtime started");

        Ok(Some(Self {
            containers: ListenerContainerRegistry::new(provider.clone(), properties.clone()),
            properties,
            provider,
            transactions,
            templates: RwLock::new(templates),
        }))
    }

    pub fn properties(&self) -> &MqProperties {
        &self.properties
    }

    pub fn transactions(&self) -> &Arc<TransactionalProducerRegistry> {
        &self.transactions
    }

    pub fn containers(&self) -> &ListenerContainerRegistry {
        &self.containers
    }

    /// The template created at bootstrap
    pub fn template(&self) -> Result<Arc<MessageTemplate>, MqBindError> {
        self.template_named(DEFAULT_TEMPLATE_NAME).ok_or_else(|| {
            MqBindError::illegal_state(format!("template '{}' is gone", DEFAULT_TEMPLATE_NAME))
        })
    }

    pub fn template_named(&self, name: &str) -> Option<Arc<MessageTemplate>> {
        self.templates.read().get(name).cloned()
    }

    /// Make an extra template addressable by name
    pub fn add_template<S: Into<String>>(
        &self,
        name: S,
        template: Arc<MessageTemplate>,
    ) -> Result<(), MqBindError> {
        let name = name.into();
        let mut templates = self.templates.write();
        if templates.contains_key(&name) {
            return Err(MqBindError::illegal_state(format!(
                "template '{}' already exists",
                name
            )));
        }
        templates.insert(name, template);
        Ok(())
    }

    pub async fn register_listener(
        &self,
        handler_name: &str,
        handler: Arc<dyn MessageListener>,
        descriptor: SubscriptionDescriptor,
    ) -> Result<Arc<ListenerContainer>, MqBindError> {
        self.containers
            .register_container(handler_name, handler, descriptor)
            .await
    }

    /// Bind `checker` to the descriptor's `(topic, tag)`.
    ///
    /// The descriptor must name a template this runtime knows.
    pub async fn register_transaction_checker(
        &self,
        checker_name: &str,
        checker: Arc<dyn TransactionChecker>,
        descriptor: TransactionalDescriptor,
    ) -> Result<(), MqBindError> {
        if self.template_named(&descriptor.template_name).is_none() {
            return Err(MqBindError::illegal_state(format!(
                "checker '{}' names unknown template '{}'",
                checker_name, descriptor.template_name
            )));
        }

        self.transactions
            .register_checker(self.provider.as_ref(), &descriptor, checker, &self.properties)
            .await?;

        info!(
            checker = %checker_name,
            key = %descriptor.key(),
            "Registered transaction checker"
        );
        Ok(())
    }

    /// Destroy containers, close template producers, then the transactional ones
    pub async fn shutdown(&self) {
        let failures = self.containers.destroy_all().await;
        if !failures.is_empty() {
            warn!(failed = failures.len(), "Some containers failed to shut down");
        }

        let templates: Vec<Arc<MessageTemplate>> = self.templates.read().values().cloned().collect();
        for template in templates {
            template.destroy().await;
        }

        self.transactions.teardown().await;
        info!("Messaging runtime stopped");
    }
}
