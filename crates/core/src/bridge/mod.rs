// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Topic-addressed publish/subscribe link between peripheral models and external
//! device processes.
//!
//! Every message is a `(topic, payload)` pair. Topics follow
//! `Peripheral.<Model>.<method>`, plus the reserved `Interrupt.Trigger` and
//! `Interrupt.Base`.

pub mod server;
pub mod transport;
pub mod wire;

pub use server::{Delivery, PeripheralServer};
pub use transport::{Publisher, Subscriber};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PERIPHERAL_PREFIX: &str = "Peripheral.";
pub const INTERRUPT_TRIGGER: &str = "Interrupt.Trigger";
pub const INTERRUPT_BASE: &str = "Interrupt.Base";

pub fn peripheral_topic(model: &str, method: &str) -> String {
    format!("{}{}.{}", PERIPHERAL_PREFIX, model, method)
}

/// Splits `Peripheral.<Model>.<method>` into `(model, method)`.
pub fn split_peripheral_topic(topic: &str) -> Option<(&str, &str)> {
    topic.strip_prefix(PERIPHERAL_PREFIX)?.split_once('.')
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Bridge I/O error on {endpoint}: {source}")]
    Io {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed frame: {0}")]
    Frame(String),
    #[error("Failed to decode payload for '{topic}': {source}")]
    Payload {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Topic '{topic}' is provided by both {first} and {second}")]
    TopicCollision {
        topic: String,
        first: String,
        second: String,
    },
    #[error("Publisher is shut down")]
    Closed,
}

impl BridgeError {
    pub(crate) fn io(endpoint: impl std::fmt::Display, source: std::io::Error) -> Self {
        BridgeError::Io {
            endpoint: endpoint.to_string(),
            source,
        }
    }
}

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

/// A tagged payload value. Raw bytes travel base64-encoded so frames stay
/// self-describing JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Int(u64),
    Str(String),
    Bool(bool),
    Bytes(#[serde(with = "b64")] Vec<u8>),
}

impl Value {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(b) => Some(u64::from(*b)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b.as_slice()),
            Value::Str(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(v) => Some(*v != 0),
            _ => None,
        }
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(u64::from(v))
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as u64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, Value>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(Value::as_u64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        self.get(key).and_then(Value::as_bytes)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Payload,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: Payload) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }
}

/// Outbound half of the bridge as seen by peripheral models. Implementations must
/// not block the caller on network I/O.
pub trait Publish: Send + Sync + std::fmt::Debug {
    fn publish(&self, topic: &str, payload: Payload) -> Result<(), BridgeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_helpers() {
        let topic = peripheral_topic("EthernetModel", "rx_frame");
        assert_eq!(topic, "Peripheral.EthernetModel.rx_frame");
        assert_eq!(
            split_peripheral_topic(&topic),
            Some(("EthernetModel", "rx_frame"))
        );
        assert_eq!(split_peripheral_topic(INTERRUPT_TRIGGER), None);
    }

    #[test]
    fn test_payload_json_shape() {
        let payload = Payload::new()
            .with("id", "eth0")
            .with("frame", vec![0xdeu8, 0xad])
            .with("num", 15u32);
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(
            json,
            r#"{"frame":{"bytes":"3q0="},"id":{"str":"eth0"},"num":{"int":15}}"#
        );
        assert_eq!(payload.get_bytes("frame"), Some(&[0xde, 0xad][..]));
    }
}
