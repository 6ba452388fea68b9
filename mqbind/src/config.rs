//! Configuration types for mqbind

use crate::error::MqBindError;
use crate::sdk::{ClientConfiguration, StaticCredentials};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Separator between entries of an endpoint list
pub const ENDPOINT_SEPARATOR: char = ';';

/// Separator between entries of a topic list
pub const TOPIC_SEPARATOR: char = ',';

/// Request timeout used when nothing else is configured
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 3;

/// Environment variable prefix read by [`MqProperties::from_env`]
pub const ENV_PREFIX: &str = "MQBIND";

pub(crate) fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

/// Picks the override when it carries a value, the fallback otherwise
pub(crate) fn non_blank_or(value: Option<&str>, fallback: &str) -> String {
    match value {
        Some(v) if !is_blank(v) => v.to_string(),
        _ => fallback.to_string(),
    }
}

/// Broker address, credentials and request timeout for one producer or consumer.
#[derive(Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Endpoints joined by `;`
    pub endpoints: String,
    pub access_key: String,
    pub secret_key: String,
    pub request_timeout: Duration,
}

impl EndpointConfig {
    pub fn new<E, A, S>(endpoints: E, access_key: A, secret_key: S) -> Self
    where
        E: Into<String>,
        A: Into<String>,
        S: Into<String>,
    {
        Self {
            endpoints: endpoints.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Individual `host:port` entries, blanks skipped
    pub fn endpoint_list(&self) -> Vec<&str> {
        self.endpoints
            .split(ENDPOINT_SEPARATOR)
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .collect()
    }

    /// Checks everything a handle needs before any network I/O happens
    pub fn validate(&self) -> Result<(), MqBindError> {
        if self.endpoint_list().is_empty() {
            return Err(MqBindError::configuration("endpoints must not be blank"));
        }
        if is_blank(&self.access_key) {
            return Err(MqBindError::configuration("access key must not be blank"));
        }
        if is_blank(&self.secret_key) {
            return Err(MqBindError::configuration("secret key must not be blank"));
        }
        if self.request_timeout.is_zero() {
            return Err(MqBindError::configuration(
                "request timeout must be greater than zero",
            ));
        }
        Ok(())
    }

    /// SDK-side client configuration for this endpoint
    pub fn client_configuration(&self) -> ClientConfiguration {
        ClientConfiguration::builder()
            .endpoints(self.endpoints.clone())
            .credentials(StaticCredentials::new(
                self.access_key.clone(),
                self.secret_key.clone(),
            ))
            .request_timeout(self.request_timeout)
            .build()
    }
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("endpoints", &self.endpoints)
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Process-wide settings shared by every producer and listener that does not
/// override them.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqProperties {
    /// Endpoints joined by `;`. Blank disables the whole runtime.
    pub endpoints: String,
    pub access_key: String,
    pub secret_key: String,
    /// Topics joined by `,`, checked by the broker when the default producer is built
    pub topics: String,
    /// Request timeout in seconds
    pub request_timeout: u64,
}

impl Default for MqProperties {
    fn default() -> Self {
        Self {
            endpoints: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            topics: String::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl fmt::Debug for MqProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqProperties")
            .field("endpoints", &self.endpoints)
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .field("topics", &self.topics)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl MqProperties {
    /// Read `MQBIND_*` environment variables
    pub fn from_env() -> Result<Self, MqBindError> {
        Self::load(None::<&Path>)
    }

    /// Read an optional settings file, with environment variables layered on top
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, MqBindError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path.as_ref()).required(true));
        }

        let settings = builder
            .add_source(Environment::with_prefix(ENV_PREFIX))
            .build()
            .map_err(|e| MqBindError::configuration(e.to_string()))?;

        settings
            .try_deserialize::<MqProperties>()
            .map_err(|e| MqBindError::configuration(e.to_string()))
    }

    pub fn has_endpoints(&self) -> bool {
        !is_blank(&self.endpoints)
    }

    /// Declared topics, blanks skipped
    pub fn topic_list(&self) -> Vec<String> {
        self.topics
            .split(TOPIC_SEPARATOR)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Endpoint configuration made of the process-wide values only
    pub fn endpoint_config(&self) -> EndpointConfig {
        EndpointConfig::new(
            self.endpoints.clone(),
            self.access_key.clone(),
            self.secret_key.clone(),
        )
        .with_request_timeout(self.request_timeout())
    }
}

/// Builder for MqProperties
#[derive(Debug, Default)]
pub struct MqPropertiesBuilder {
    properties: MqProperties,
}

impl MqPropertiesBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoints<I, S>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties.endpoints = endpoints
            .into_iter()
            .map(Into::into)
            .collect::<Vec<String>>()
            .join(&ENDPOINT_SEPARATOR.to_string());
        self
    }

    pub fn access_key<S: Into<String>>(mut self, access_key: S) -> Self {
        self.properties.access_key = access_key.into();
        self
    }

    pub fn secret_key<S: Into<String>>(mut self, secret_key: S) -> Self {
        self.properties.secret_key = secret_key.into();
        self
    }

    pub fn topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties.topics = topics
            .into_iter()
            .map(Into::into)
            .collect::<Vec<String>>()
            .join(&TOPIC_SEPARATOR.to_string());
        self
    }

    /// Stored in whole seconds, rounded up
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.properties.request_timeout =
            timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
        self
    }

    pub fn build(self) -> MqProperties {
        self.properties
    }
}
