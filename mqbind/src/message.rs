//! Message envelopes and payload encoding

use crate::config::is_blank;
use crate::error::MqBindError;
use bytes::Bytes;
use serde::Serialize;
use std::time::Duration;

/// Logical payload handed to the facade.
///
/// Every variant turns into a body; nothing is dropped on the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Encoded as UTF-8
    Text(String),
    /// Passed through untouched
    Bytes(Bytes),
    /// Already-encoded JSON document
    Structured(Bytes),
}

impl Payload {
    /// Encode any serializable value as JSON
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, MqBindError> {
        serde_json::to_vec(value)
            .map(|encoded| Payload::Structured(Bytes::from(encoded)))
            .map_err(|e| MqBindError::serialization(e.to_string()))
    }

    /// Wire body for this payload
    pub fn into_body(self) -> Bytes {
        match self {
            Payload::Text(text) => Bytes::from(text.into_bytes()),
            Payload::Bytes(raw) => raw,
            Payload::Structured(encoded) => encoded,
        }
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Text(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Text(value.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Bytes(Bytes::from(value))
    }
}

impl From<&[u8]> for Payload {
    fn from(value: &[u8]) -> Self {
        Payload::Bytes(Bytes::copy_from_slice(value))
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Payload::Bytes(value)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        // Value always serializes; keys are strings by construction
        Payload::Structured(Bytes::from(value.to_string().into_bytes()))
    }
}

/// Outbound message ready for the broker SDK
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub body: Bytes,
    pub tag: Option<String>,
    /// Dedup/business keys, first occurrence order
    pub keys: Vec<String>,
    pub message_group: Option<String>,
    /// Epoch milliseconds at which the broker may deliver the message
    pub delivery_timestamp: Option<i64>,
}

impl Message {
    /// Create a new message builder
    pub fn builder<T: Into<String>>(topic: T) -> MessageBuilder {
        MessageBuilder::new(topic)
    }

    pub fn is_delayed(&self) -> bool {
        self.delivery_timestamp.is_some()
    }

    pub fn is_ordered(&self) -> bool {
        self.message_group.is_some()
    }
}

/// Builder for Message
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    topic: String,
    body: Bytes,
    tag: Option<String>,
    keys: Vec<String>,
    message_group: Option<String>,
    delay: Option<Duration>,
}

impl MessageBuilder {
    pub fn new<T: Into<String>>(topic: T) -> Self {
        Self {
            topic: topic.into(),
            body: Bytes::new(),
            tag: None,
            keys: Vec::new(),
            message_group: None,
            delay: None,
        }
    }

    pub fn payload<P: Into<Payload>>(mut self, payload: P) -> Self {
        self.body = payload.into().into_body();
        self
    }

    /// Blank tags are ignored
    pub fn tag<S: AsRef<str>>(mut self, tag: S) -> Self {
        let tag = tag.as_ref();
        self.tag = (!is_blank(tag)).then(|| tag.to_string());
        self
    }

    pub fn keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for key in keys {
            let key = key.into();
            if !self.keys.contains(&key) {
                self.keys.push(key);
            }
        }
        self
    }

    /// Blank groups are ignored
    pub fn message_group<S: AsRef<str>>(mut self, group: S) -> Self {
        let group = group.as_ref();
        self.message_group = (!is_blank(group)).then(|| group.to_string());
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn build(self) -> Result<Message, MqBindError> {
        if is_blank(&self.topic) {
            return Err(MqBindError::configuration("topic must not be blank"));
        }
        if self.delay.is_some() && self.message_group.is_some() {
            return Err(MqBindError::configuration(format!(
                "message for topic '{}' cannot carry both a delivery delay and a message group",
                self.topic
            )));
        }

        let delivery_timestamp = self.delay.map(|delay| {
            let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
            chrono::Utc::now().timestamp_millis().saturating_add(delay_ms)
        });

        Ok(Message {
            topic: self.topic,
            body: self.body,
            tag: self.tag,
            keys: self.keys,
            message_group: self.message_group,
            delivery_timestamp,
        })
    }
}

/// Turn a payload plus delivery options into a message.
pub fn build_message<P: Into<Payload>>(
    topic: &str,
    payload: P,
    message_group: Option<&str>,
    delay: Option<Duration>,
    tag: Option<&str>,
    keys: &[&str],
) -> Result<Message, MqBindError> {
    let mut builder = MessageBuilder::new(topic).payload(payload).keys(keys.iter().copied());
    if let Some(group) = message_group {
        builder = builder.message_group(group);
    }
    if let Some(delay) = delay {
        builder = builder.delay(delay);
    }
    if let Some(tag) = tag {
        builder = builder.tag(tag);
    }
    builder.build()
}

/// Inbound message as delivered by the SDK
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageView {
    pub message_id: String,
    pub topic: String,
    pub body: Bytes,
    pub tag: Option<String>,
    pub keys: Vec<String>,
    pub message_group: Option<String>,
    pub delivery_timestamp: Option<i64>,
    pub born_timestamp: i64,
    pub delivery_attempt: u32,
}

impl MessageView {
    pub fn from_message<S: Into<String>>(message_id: S, message: &Message) -> Self {
        Self {
            message_id: message_id.into(),
            topic: message.topic.clone(),
            body: message.body.clone(),
            tag: message.tag.clone(),
            keys: message.keys.clone(),
            message_group: message.message_group.clone(),
            delivery_timestamp: message.delivery_timestamp,
            born_timestamp: chrono::Utc::now().timestamp_millis(),
            delivery_attempt: 1,
        }
    }

    /// Body decoded as UTF-8, lossy
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Broker acknowledgement of a send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: String,
}
