//! In-process broker SDK
//!
//! Producers deliver inline to every open push consumer whose subscription
//! matches. Tag filters are evaluated locally; SQL92 filters match everything.
//! Transactional messages are held until the transaction is committed, rolled
//! back, or resolved by [`LoopbackProvider::run_transaction_checks`].

use super::{
    ClientError, ClientServiceProvider, MessageListener, ProducerClient, ProducerSettings,
    PushConsumerClient, PushConsumerSettings, StaticCredentials, Transaction, TransactionChecker,
    TransactionResolution,
};
use crate::filter::FilterExpression;
use crate::message::{Message, MessageView, SendReceipt};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

struct Subscription {
    consumer_group: String,
    filters: HashMap<String, FilterExpression>,
    listener: Arc<dyn MessageListener>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxPhase {
    Open,
    Committed,
    RolledBack,
}

struct TxInner {
    id: String,
    checker: Arc<dyn TransactionChecker>,
    messages: Mutex<Vec<MessageView>>,
    phase: Mutex<TxPhase>,
}

#[derive(Default)]
struct LoopbackBroker {
    known_topics: RwLock<Option<HashSet<String>>>,
    credentials: RwLock<Option<StaticCredentials>>,
    subscriptions: RwLock<HashMap<u64, Arc<Subscription>>>,
    open_transactions: Mutex<HashMap<String, Arc<TxInner>>>,
    published: Mutex<Vec<Message>>,
    fail_consumer_close: AtomicBool,
    producers_built: AtomicUsize,
    sdk_calls: AtomicUsize,
    next_id: AtomicU64,
}

impl LoopbackBroker {
    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{:08}", prefix, self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn record_call(&self) {
        self.sdk_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn authenticate(&self, endpoints: &str, credentials: &StaticCredentials) -> Result<(), ClientError> {
        if endpoints.trim().is_empty() {
            return Err(ClientError::network("no endpoints configured"));
        }
        if let Some(expected) = self.credentials.read().as_ref() {
            if expected != credentials {
                return Err(ClientError::unauthorized(format!(
                    "access key '{}' rejected",
                    credentials.access_key
                )));
            }
        }
        Ok(())
    }

    fn check_topic(&self, topic: &str) -> Result<(), ClientError> {
        match self.known_topics.read().as_ref() {
            Some(topics) if !topics.contains(topic) => Err(ClientError::bad_request(format!(
                "topic '{}' does not exist",
                topic
            ))),
            _ => Ok(()),
        }
    }

    async fn dispatch(&self, view: MessageView) {
        let targets: Vec<Arc<Subscription>> = self
            .subscriptions
            .read()
            .values()
            .filter(|sub| {
                sub.filters.get(&view.topic).is_some_and(|filter| {
                    filter.matches_tag(view.tag.as_deref()).unwrap_or(true)
                })
            })
            .cloned()
            .collect();

        for sub in targets {
            let result = sub.listener.consume(view.clone()).await;
            debug!(
                message_id = %view.message_id,
                consumer_group = %sub.consumer_group,
                result = ?result,
                "Loopback delivered message"
            );
        }
    }

    async fn accept(&self, message: Message) -> SendReceipt {
        let message_id = self.next_id("LB");
        let view = MessageView::from_message(message_id.clone(), &message);
        self.published.lock().push(message);
        self.dispatch(view).await;
        SendReceipt { message_id }
    }

    async fn resolve(&self, tx: &TxInner, commit: bool) -> Result<(), ClientError> {
        {
            let mut phase = tx.phase.lock();
            if *phase != TxPhase::Open {
                return Err(ClientError::closed(format!(
                    "transaction {} already resolved",
                    tx.id
                )));
            }
            *phase = if commit {
                TxPhase::Committed
            } else {
                TxPhase::RolledBack
            };
        }
        self.open_transactions.lock().remove(&tx.id);

        let messages = std::mem::take(&mut *tx.messages.lock());
        if commit {
            for view in messages {
                let message = Message {
                    topic: view.topic.clone(),
                    body: view.body.clone(),
                    tag: view.tag.clone(),
                    keys: view.keys.clone(),
                    message_group: view.message_group.clone(),
                    delivery_timestamp: view.delivery_timestamp,
                };
                self.published.lock().push(message);
                self.dispatch(view).await;
            }
        }
        info!(transaction_id = %tx.id, commit, "Loopback transaction resolved");
        Ok(())
    }
}

/// In-process [`ClientServiceProvider`].
///
/// Clones share the same broker state.
#[derive(Clone, Default)]
pub struct LoopbackProvider {
    broker: Arc<LoopbackBroker>,
}

impl LoopbackProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject producers and subscriptions naming any other topic
    pub fn with_topics<I, S>(self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.broker.known_topics.write() = Some(topics.into_iter().map(Into::into).collect());
        self
    }

    /// Reject clients presenting other credentials
    pub fn with_credentials<A: Into<String>, S: Into<String>>(self, access_key: A, secret_key: S) -> Self {
        *self.broker.credentials.write() = Some(StaticCredentials::new(access_key, secret_key));
        self
    }

    /// Make every subsequent push consumer close fail
    pub fn set_consumer_close_failure(&self, fail: bool) {
        self.broker.fail_consumer_close.store(fail, Ordering::Relaxed);
    }

    pub fn producers_built(&self) -> usize {
        self.broker.producers_built.load(Ordering::Relaxed)
    }

    pub fn active_consumers(&self) -> usize {
        self.broker.subscriptions.read().len()
    }

    /// Number of requests that reached the broker
    pub fn sdk_calls(&self) -> usize {
        self.broker.sdk_calls.load(Ordering::Relaxed)
    }

    /// Messages accepted for delivery, in order
    pub fn published(&self) -> Vec<Message> {
        self.broker.published.lock().clone()
    }

    pub fn open_transactions(&self) -> usize {
        self.broker.open_transactions.lock().len()
    }

    /// Ask each open transaction's checker for a verdict and apply it.
    ///
    /// Returns how many transactions were resolved.
    pub async fn run_transaction_checks(&self) -> usize {
        let open: Vec<Arc<TxInner>> = self.broker.open_transactions.lock().values().cloned().collect();
        let mut resolved = 0;

        for tx in open {
            let first = tx.messages.lock().first().cloned();
            let Some(view) = first else {
                continue;
            };
            let verdict = tx.checker.check(&view).await;
            debug!(transaction_id = %tx.id, verdict = ?verdict, "Loopback transaction checked");

            let outcome = match verdict {
                TransactionResolution::Commit => self.broker.resolve(&tx, true).await,
                TransactionResolution::Rollback => self.broker.resolve(&tx, false).await,
                TransactionResolution::Unknown => continue,
            };
            if outcome.is_ok() {
                resolved += 1;
            }
        }

        resolved
    }
}

#[async_trait]
impl ClientServiceProvider for LoopbackProvider {
    async fn build_producer(
        &self,
        settings: ProducerSettings,
    ) -> Result<Arc<dyn ProducerClient>, ClientError> {
        self.broker.record_call();
        self.broker
            .authenticate(&settings.client.endpoints, &settings.client.credentials)?;
        for topic in &settings.topics {
            self.broker.check_topic(topic)?;
        }

        self.broker.producers_built.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(LoopbackProducer {
            broker: self.broker.clone(),
            checker: settings.checker,
            closed: AtomicBool::new(false),
        }))
    }

    async fn build_push_consumer(
        &self,
        settings: PushConsumerSettings,
    ) -> Result<Box<dyn PushConsumerClient>, ClientError> {
        self.broker.record_call();
        self.broker
            .authenticate(&settings.client.endpoints, &settings.client.credentials)?;
        if settings.consumer_group.trim().is_empty() {
            return Err(ClientError::bad_request("consumer group is blank"));
        }
        if settings.subscriptions.is_empty() {
            return Err(ClientError::bad_request("no subscription expressions"));
        }
        for topic in settings.subscriptions.keys() {
            self.broker.check_topic(topic)?;
        }

        let id = self.broker.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.broker.subscriptions.write().insert(
            id,
            Arc::new(Subscription {
                consumer_group: settings.consumer_group.clone(),
                filters: settings.subscriptions,
                listener: settings.listener,
            }),
        );

        Ok(Box::new(LoopbackPushConsumer {
            id,
            consumer_group: settings.consumer_group,
            broker: self.broker.clone(),
        }))
    }
}

struct LoopbackProducer {
    broker: Arc<LoopbackBroker>,
    checker: Option<Arc<dyn TransactionChecker>>,
    closed: AtomicBool,
}

impl LoopbackProducer {
    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::closed("producer is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl ProducerClient for LoopbackProducer {
    async fn send(&self, message: Message) -> Result<SendReceipt, ClientError> {
        self.broker.record_call();
        self.ensure_open()?;
        self.broker.check_topic(&message.topic)?;
        Ok(self.broker.accept(message).await)
    }

    async fn send_in_transaction(
        &self,
        message: Message,
        transaction: &dyn Transaction,
    ) -> Result<SendReceipt, ClientError> {
        self.broker.record_call();
        self.ensure_open()?;
        self.broker.check_topic(&message.topic)?;

        let tx = transaction
            .as_any()
            .downcast_ref::<LoopbackTransaction>()
            .ok_or_else(|| ClientError::bad_request("transaction was not issued by this broker"))?;
        if *tx.inner.phase.lock() != TxPhase::Open {
            return Err(ClientError::closed(format!(
                "transaction {} already resolved",
                tx.inner.id
            )));
        }

        let message_id = self.broker.next_id("LB");
        tx.inner
            .messages
            .lock()
            .push(MessageView::from_message(message_id.clone(), &message));
        Ok(SendReceipt { message_id })
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>, ClientError> {
        self.broker.record_call();
        self.ensure_open()?;
        let checker = self
            .checker
            .clone()
            .ok_or_else(|| ClientError::bad_request("producer has no transaction checker"))?;

        let inner = Arc::new(TxInner {
            id: self.broker.next_id("TX"),
            checker,
            messages: Mutex::new(Vec::new()),
            phase: Mutex::new(TxPhase::Open),
        });
        self.broker
            .open_transactions
            .lock()
            .insert(inner.id.clone(), inner.clone());

        Ok(Box::new(LoopbackTransaction {
            inner,
            broker: self.broker.clone(),
        }))
    }

    async fn close(&self) -> Result<(), ClientError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

struct LoopbackTransaction {
    inner: Arc<TxInner>,
    broker: Arc<LoopbackBroker>,
}

#[async_trait]
impl Transaction for LoopbackTransaction {
    fn id(&self) -> &str {
        &self.inner.id
    }

    async fn commit(&self) -> Result<(), ClientError> {
        self.broker.record_call();
        self.broker.resolve(&self.inner, true).await
    }

    async fn rollback(&self) -> Result<(), ClientError> {
        self.broker.record_call();
        self.broker.resolve(&self.inner, false).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct LoopbackPushConsumer {
    id: u64,
    consumer_group: String,
    broker: Arc<LoopbackBroker>,
}

#[async_trait]
impl PushConsumerClient for LoopbackPushConsumer {
    fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    async fn close(&self) -> Result<(), ClientError> {
        if self.broker.fail_consumer_close.load(Ordering::Relaxed) {
            return Err(ClientError::network("connection reset while closing consumer"));
        }
        self.broker.subscriptions.write().remove(&self.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::SelectorKind;
    use crate::sdk::{ClientConfiguration, ClientErrorKind, ConsumeResult};

    #[derive(Default)]
    struct Collect {
        seen: Mutex<Vec<MessageView>>,
    }

    #[async_trait]
    impl MessageListener for Collect {
        async fn consume(&self, message: MessageView) -> ConsumeResult {
            self.seen.lock().push(message);
            ConsumeResult::Success
        }
    }

    struct Verdict(TransactionResolution);

    #[async_trait]
    impl TransactionChecker for Verdict {
        async fn check(&self, _message: &MessageView) -> TransactionResolution {
            self.0
        }
    }

    fn client() -> ClientConfiguration {
        ClientConfiguration::builder()
            .endpoints("127.0.0.1:8081")
            .credentials(StaticCredentials::new("ak", "sk"))
            .build()
    }

    fn message(topic: &str, tag: &str) -> Message {
        Message::builder(topic).payload("x").tag(tag).build().unwrap()
    }

    async fn subscribe(
        provider: &LoopbackProvider,
        filter: FilterExpression,
    ) -> (Box<dyn PushConsumerClient>, Arc<Collect>) {
        let listener = Arc::new(Collect::default());
        let consumer = provider
            .build_push_consumer(PushConsumerSettings {
                client: client(),
                consumer_group: "g".to_string(),
                subscriptions: HashMap::from([("orders".to_string(), filter)]),
                listener: listener.clone(),
                instance_name: None,
            })
            .await
            .unwrap();
        (consumer, listener)
    }

    #[tokio::test]
    async fn test_delivery_respects_tag_filter() {
        let provider = LoopbackProvider::new();
        let (_consumer, listener) =
            subscribe(&provider, FilterExpression::new("paid", SelectorKind::Tag)).await;
        let producer = provider
            .build_producer(ProducerSettings {
                client: client(),
                topics: vec![],
                checker: None,
            })
            .await
            .unwrap();

        producer.send(message("orders", "paid")).await.unwrap();
        producer.send(message("orders", "created")).await.unwrap();
        producer.send(message("refunds", "paid")).await.unwrap();

        assert_eq!(listener.seen.lock().len(), 1);
        assert_eq!(provider.published().len(), 3);
    }

    #[tokio::test]
    async fn test_closed_consumer_stops_delivery() {
        let provider = LoopbackProvider::new();
        let (consumer, listener) = subscribe(&provider, FilterExpression::sub_all()).await;
        assert_eq!(provider.active_consumers(), 1);

        consumer.close().await.unwrap();
        consumer.close().await.unwrap();
        assert_eq!(provider.active_consumers(), 0);

        let producer = provider
            .build_producer(ProducerSettings {
                client: client(),
                topics: vec![],
                checker: None,
            })
            .await
            .unwrap();
        producer.send(message("orders", "paid")).await.unwrap();
        assert!(listener.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_strict_topics_and_credentials() {
        let provider = LoopbackProvider::new()
            .with_topics(["orders"])
            .with_credentials("ak", "other");

        let denied = provider
            .build_producer(ProducerSettings {
                client: client(),
                topics: vec!["orders".to_string()],
                checker: None,
            })
            .await;
        assert_eq!(denied.err().map(|e| e.kind), Some(ClientErrorKind::Unauthorized));

        let provider = LoopbackProvider::new().with_topics(["orders"]);
        let unknown = provider
            .build_producer(ProducerSettings {
                client: client(),
                topics: vec!["missing".to_string()],
                checker: None,
            })
            .await;
        assert_eq!(unknown.err().map(|e| e.kind), Some(ClientErrorKind::BadRequest));
    }

    #[tokio::test]
    async fn test_transaction_held_until_commit() {
        let provider = LoopbackProvider::new();
        let (_consumer, listener) = subscribe(&provider, FilterExpression::sub_all()).await;
        let producer = provider
            .build_producer(ProducerSettings {
                client: client(),
                topics: vec![],
                checker: Some(Arc::new(Verdict(TransactionResolution::Unknown))),
            })
            .await
            .unwrap();

        let tx = producer.begin_transaction().await.unwrap();
        producer
            .send_in_transaction(message("orders", "paid"), tx.as_ref())
            .await
            .unwrap();
        assert!(listener.seen.lock().is_empty());
        assert_eq!(provider.run_transaction_checks().await, 0);

        tx.commit().await.unwrap();
        assert_eq!(listener.seen.lock().len(), 1);
        assert!(tx.rollback().await.is_err());
        assert_eq!(provider.open_transactions(), 0);
    }

    #[tokio::test]
    async fn test_checker_resolves_open_transaction() {
        let provider = LoopbackProvider::new();
        let (_consumer, listener) = subscribe(&provider, FilterExpression::sub_all()).await;
        let producer = provider
            .build_producer(ProducerSettings {
                client: client(),
                topics: vec![],
                checker: Some(Arc::new(Verdict(TransactionResolution::Rollback))),
            })
            .await
            .unwrap();

        let tx = producer.begin_transaction().await.unwrap();
        producer
            .send_in_transaction(message("orders", "paid"), tx.as_ref())
            .await
            .unwrap();

        assert_eq!(provider.run_transaction_checks().await, 1);
        assert!(listener.seen.lock().is_empty());
        assert_eq!(provider.open_transactions(), 0);
    }

    #[tokio::test]
    async fn test_begin_requires_checker() {
        let provider = LoopbackProvider::new();
        let producer = provider
            .build_producer(ProducerSettings {
                client: client(),
                topics: vec![],
                checker: None,
            })
            .await
            .unwrap();
        let result = producer.begin_transaction().await;
        assert_eq!(result.err().map(|e| e.kind), Some(ClientErrorKind::BadRequest));
    }
}
