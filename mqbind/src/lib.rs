//! # mqbind
//!
//! A client-side runtime that binds application handlers to broker
//! subscriptions and manages producer lifecycles.
//!
//! ## Features
//!
//! - **Listener containers**: one push consumer per handler, with an explicit
//!   start/stop/destroy lifecycle
//! - **Transactional producers**: at most one checker-bound producer per
//!   `(topic, tag)`
//! - **Message template**: normal, delayed, ordered and transactional sends
//! - **Pluggable SDK**: the broker client sits behind async traits; an
//!   in-process loopback implementation ships with the crate
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mqbind::*;
//! use mqbind::sdk::loopback::LoopbackProvider;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let properties = MqPropertiesBuilder::new()
//!         .endpoints(vec!["127.0.0.1:8081"])
//!         .access_key("ak")
//!         .secret_key("sk")
//!         .build();
//!
//!     let Some(runtime) =
//!         MessagingRuntime::bootstrap(properties, Arc::new(LoopbackProvider::new())).await?
//!     else {
//!         return Ok(());
//!     };
//!
//!     let receipt = runtime
//!         .template()?
//!         .send_normal("orders", "Hello!", Some("created"), &["order-1"])
//!         .await?;
//!     println!("Sent {}", receipt.message_id);
//!
//!     runtime.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod container;
pub mod error;
pub mod filter;
pub mod message;
pub mod metrics;
pub mod producer;
pub mod registry;
pub mod runtime;
pub mod sdk;
pub mod template;
pub mod transaction;

pub use config::*;
pub use container::*;
pub use error::*;
pub use filter::{FilterExpression, SelectorKind};
pub use message::*;
pub use producer::*;
pub use registry::ListenerContainerRegistry;
pub use runtime::MessagingRuntime;
pub use sdk::{ConsumeResult, MessageListener, Transaction, TransactionChecker, TransactionResolution};
pub use template::{MessageTemplate, DEFAULT_TEMPLATE_NAME};
pub use transaction::*;

/// Library result type
pub type Result<T> = std::result::Result<T, MqBindError>;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
