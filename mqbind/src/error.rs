//! Error types for the mqbind runtime

use crate::sdk::ClientError;
use crate::transaction::TransactionKey;

/// Main error type for mqbind operations
#[derive(Debug, thiserror::Error)]
pub enum MqBindError {
    /// A required setting is missing or blank
    #[error("Invalid configuration: {message}")]
    Configuration { message: String },

    /// The broker SDK rejected a call
    #[error(transparent)]
    Client(#[from] ClientError),

    /// A lifecycle contract was violated
    #[error("Illegal state: {message}")]
    IllegalState { message: String },

    /// A transactional producer is already bound to this key
    #[error("Transactional producer already registered for '{key}'")]
    DuplicateRegistration { key: TransactionKey },

    /// No transactional producer is bound to this key
    #[error("No transactional producer registered for '{key}'")]
    NotRegistered { key: TransactionKey },

    /// Releasing a producer or consumer failed
    #[error("Close error: {message}")]
    Close { message: String },

    /// A structured payload could not be encoded
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Registry-orchestrated startup of a container failed
    #[error("Failed to start listener container '{container}': {source}")]
    Startup {
        container: String,
        #[source]
        source: Box<MqBindError>,
    },
}

impl MqBindError {
    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new illegal state error
    pub fn illegal_state<S: Into<String>>(message: S) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Create a new close error
    pub fn close<S: Into<String>>(message: S) -> Self {
        Self::Close {
            message: message.into(),
        }
    }

    /// Create a new serialization error
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Wrap a failure raised while starting a container
    pub fn startup<S: Into<String>>(container: S, source: MqBindError) -> Self {
        Self::Startup {
            container: container.into(),
            source: Box::new(source),
        }
    }

    /// Check if this error is a lifecycle contract violation
    pub fn is_illegal_state(&self) -> bool {
        matches!(
            self,
            Self::IllegalState { .. } | Self::DuplicateRegistration { .. }
        )
    }

    /// Check if this error is a configuration defect
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::Configuration { .. } | Self::NotRegistered { .. } => true,
            Self::Startup { source, .. } => source.is_configuration(),
            _ => false,
        }
    }

    /// Check if the caller may retry the operation that produced this error.
    ///
    /// Only transient SDK failures qualify; nothing is retried internally.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Client(e) => e.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::ClientErrorKind;

    #[test]
    fn test_duplicate_registration_is_illegal_state() {
        let err = MqBindError::DuplicateRegistration {
            key: TransactionKey::new("orders", "paid"),
        };
        assert!(err.is_illegal_state());
        assert_eq!(
            err.to_string(),
            "Transactional producer already registered for 'orders_paid'"
        );
    }

    #[test]
    fn test_startup_keeps_source() {
        let err = MqBindError::startup(
            "ListenerContainer_1",
            MqBindError::configuration("consumer group is required"),
        );
        assert!(err.is_configuration());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_retryable_only_for_transient_client_errors() {
        let timeout = MqBindError::from(ClientError::new(ClientErrorKind::Timeout, "slow"));
        let denied = MqBindError::from(ClientError::new(ClientErrorKind::Unauthorized, "bad key"));
        assert!(timeout.is_retryable());
        assert!(!denied.is_retryable());
        assert!(!MqBindError::illegal_state("running").is_retryable());
    }
}
