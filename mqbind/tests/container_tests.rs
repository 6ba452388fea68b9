use async_trait::async_trait;
use mqbind::sdk::loopback::LoopbackProvider;
use mqbind::{
    ConsumeResult, ContainerState, EndpointConfig, ListenerContainer, MessageListener,
    MessageView, MqBindError, SubscriptionDescriptor,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct Noop;

#[async_trait]
impl MessageListener for Noop {
    async fn consume(&self, _message: MessageView) -> ConsumeResult {
        ConsumeResult::Success
    }
}

fn container(provider: &LoopbackProvider) -> ListenerContainer {
    ListenerContainer::new(
        "ListenerContainer_test",
        SubscriptionDescriptor::new("orders", "g").tag("paid"),
        EndpointConfig::new("127.0.0.1:8081", "ak", "sk"),
        Arc::new(Noop),
        Arc::new(provider.clone()),
    )
}

#[tokio::test]
async fn test_double_start_keeps_one_consumer() {
    let provider = LoopbackProvider::new();
    let container = container(&provider);
    container.validate().await.unwrap();
    container.start().await.unwrap();

    let second = container.start().await;
    assert!(second.unwrap_err().is_illegal_state());
    assert_eq!(provider.active_consumers(), 1);
    assert_eq!(container.state().await, ContainerState::Running);
}

#[tokio::test]
async fn test_noop_transitions() {
    let provider = LoopbackProvider::new();
    let container = container(&provider);

    container.stop().await.unwrap();
    container.destroy().await.unwrap();
    container.destroy().await.unwrap();
    assert_eq!(container.state().await, ContainerState::Destroyed);
    assert_eq!(provider.sdk_calls(), 0);
}

#[tokio::test]
async fn test_start_before_validate_fails() {
    let provider = LoopbackProvider::new();
    let container = container(&provider);

    let result = container.start().await;
    assert!(result.unwrap_err().is_illegal_state());
    assert_eq!(provider.active_consumers(), 0);
}

#[tokio::test]
async fn test_restart_after_stop() {
    let provider = LoopbackProvider::new();
    let container = container(&provider);
    container.validate().await.unwrap();
    container.start().await.unwrap();

    container.stop().await.unwrap();
    assert_eq!(provider.active_consumers(), 0);
    assert!(container.filter_expression().await.is_some());

    container.start().await.unwrap();
    assert_eq!(provider.active_consumers(), 1);
    assert_eq!(container.filter_expression().await.unwrap().expression(), "paid");
}

#[tokio::test]
async fn test_failed_stop_keeps_running_and_runs_callback() {
    let provider = LoopbackProvider::new();
    let container = container(&provider);
    container.validate().await.unwrap();
    container.start().await.unwrap();

    provider.set_consumer_close_failure(true);
    let called = AtomicBool::new(false);
    let result = container
        .stop_with(|| called.store(true, Ordering::SeqCst))
        .await;

    assert!(matches!(result, Err(MqBindError::Close { .. })));
    assert!(called.load(Ordering::SeqCst));
    assert!(container.is_running());
    assert_eq!(container.state().await, ContainerState::Running);

    provider.set_consumer_close_failure(false);
    container.stop().await.unwrap();
    assert_eq!(container.state().await, ContainerState::Stopped);
}
