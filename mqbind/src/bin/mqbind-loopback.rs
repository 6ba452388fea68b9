use async_trait::async_trait;
use clap::Parser;
use mqbind::sdk::loopback::LoopbackProvider;
use mqbind::{
    ConsumeResult, MessageListener, MessageView, MessagingRuntime, MqProperties, Payload,
    Result, SubscriptionDescriptor, TransactionChecker, TransactionResolution,
    TransactionalDescriptor,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_ENDPOINTS: &str = "127.0.0.1:8081";
const DEFAULT_CREDENTIAL: &str = "loopback";

#[derive(Parser, Debug)]
#[command(name = "mqbind-loopback")]
#[command(about = "Exercise the mqbind runtime against an in-process broker")]
struct Args {
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional settings file, overridden by MQBIND_* variables
    #[arg(long)]
    config: Option<String>,

    /// Endpoints joined by ';', overriding the file and environment
    #[arg(long)]
    endpoints: Option<String>,

    #[arg(long)]
    access_key: Option<String>,

    #[arg(long)]
    secret_key: Option<String>,

    #[arg(short, long, default_value = "demo-topic")]
    topic: String,

    #[arg(short, long, default_value = "demo-group")]
    group: String,

    #[arg(long, default_value = "demo")]
    tag: String,
}

struct PrintingListener;

#[async_trait]
impl MessageListener for PrintingListener {
    async fn consume(&self, message: MessageView) -> ConsumeResult {
        info!(
            message_id = %message.message_id,
            tag = ?message.tag,
            group = ?message.message_group,
            body = %message.body_text(),
            "Received"
        );
        ConsumeResult::Success
    }
}

struct CommitChecker;

#[async_trait]
impl TransactionChecker for CommitChecker {
    async fn check(&self, message: &MessageView) -> TransactionResolution {
        info!(message_id = %message.message_id, "Checking transaction");
        TransactionResolution::Commit
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(parse_log_level(&args.log_level))
        .init();

    let mut properties = MqProperties::load(args.config.as_deref())?;
    apply_overrides(&mut properties, &args);

    let provider = LoopbackProvider::new();
    let Some(runtime) = MessagingRuntime::bootstrap(properties, Arc::new(provider.clone())).await?
    else {
        warn!("Nothing to do without endpoints");
        return Ok(());
    };

    runtime
        .register_listener(
            "printingListener",
            Arc::new(PrintingListener),
            SubscriptionDescriptor::new(args.topic.as_str(), args.group.as_str()),
        )
        .await?;
    runtime
        .register_transaction_checker(
            "commitChecker",
            Arc::new(CommitChecker),
            TransactionalDescriptor::new(args.topic.as_str(), args.tag.as_str()),
        )
        .await?;

    let template = runtime.template()?;
    let topic = args.topic.as_str();
    let tag = args.tag.as_str();

    template
        .send_normal(topic, "hello", Some(tag), &["key-1"])
        .await?;
    template
        .send_delay(topic, b"delayed".as_slice(), Duration::from_secs(5), Some(tag), &[])
        .await?;
    for i in 0..2 {
        template
            .send_fifo(topic, format!("ordered-{}", i), "group-42", Some(tag), &[])
            .await?;
    }
    template
        .send_normal(topic, Payload::json(&json!({ "id": 7, "status": "created" }))?, None, &[])
        .await?;

    let committed = template.begin_transaction(topic, tag).await?;
    template
        .send_transaction(committed.as_ref(), topic, "committed by application", tag, &[])
        .await?;
    committed.commit().await?;

    let pending = template.begin_transaction(topic, tag).await?;
    template
        .send_transaction(pending.as_ref(), topic, "committed by checker", tag, &[])
        .await?;
    let resolved = provider.run_transaction_checks().await;
    info!(resolved, "Transaction checks finished");

    let sent = template.metrics().snapshot();
    info!(
        records_sent = sent.records_sent,
        bytes_sent = sent.bytes_sent,
        transactions_begun = sent.transactions_begun,
        avg_latency_us = sent.average_send_latency_us,
        "Send metrics"
    );
    for id in runtime.containers().ids() {
        if let Some(container) = runtime.containers().get(&id) {
            let consumed = container.metrics().snapshot();
            info!(
                container = %id,
                messages_consumed = consumed.messages_consumed,
                consume_failures = consumed.consume_failures,
                "Consume metrics"
            );
        }
    }

    runtime.shutdown().await;
    Ok(())
}

/// Flags win over file and environment values; blanks fall back to demo defaults
fn apply_overrides(properties: &mut MqProperties, args: &Args) {
    if let Some(endpoints) = non_blank(args.endpoints.as_deref()) {
        properties.endpoints = endpoints;
    }
    if let Some(access_key) = non_blank(args.access_key.as_deref()) {
        properties.access_key = access_key;
    } else if properties.access_key.trim().is_empty() {
        properties.access_key = DEFAULT_CREDENTIAL.to_string();
    }
    if let Some(secret_key) = non_blank(args.secret_key.as_deref()) {
        properties.secret_key = secret_key;
    } else if properties.secret_key.trim().is_empty() {
        properties.secret_key = DEFAULT_CREDENTIAL.to_string();
    }
    if properties.endpoints.trim().is_empty() {
        properties.endpoints = DEFAULT_ENDPOINTS.to_string();
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_log_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => {
            eprintln!("Invalid log level '{}', defaulting to 'info'", level);
            tracing::Level::INFO
        }
    }
}
