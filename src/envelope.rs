//! Bus envelope wrapping every message on the wire.
//!
//! Producers wrap their payload in an [`Envelope`] carrying a unique id, a
//! type tag, and optional trace context. The payload itself stays raw JSON
//! so it can be decoded after the outer fields have been inspected.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;
use ulid::Ulid;

/// Errors produced by the envelope codec.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("envelope decode failed: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("envelope encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("payload is not valid JSON: {0}")]
    Payload(#[source] serde_json::Error),
}

/// Message type tag carried by every envelope.
///
/// Unknown tags decode as [`MessageType::Unknown`] so a malformed producer
/// cannot wedge the consumer; the worker rejects such messages with a
/// labeled reason instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    ContentEvent,
    DeliveryRecord,
    #[serde(other)]
    Unknown,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::ContentEvent => "content_event",
            MessageType::DeliveryRecord => "delivery_record",
            MessageType::Unknown => "unknown",
        }
    }
}

/// The outer record on the bus.
///
/// `message` is kept as raw JSON; decoding is deferred until the caller has
/// checked `message_type`. The id is assigned at construction and is never
/// rewritten.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    /// Flat trace-propagation carrier. Omitted from the wire when empty.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub trace: HashMap<String, String>,

    pub id: String,

    pub message_type: MessageType,

    /// Raw payload, decoded according to `message_type`.
    pub message: Box<RawValue>,
}

impl Envelope {
    /// Wrap a serialized payload in a new envelope.
    ///
    /// Ids are ULIDs: lexicographically sortable by creation time, and two
    /// envelopes created within the same millisecond still differ.
    pub fn new(message_type: MessageType, message: Box<RawValue>) -> Self {
        Self {
            trace: HashMap::new(),
            id: Ulid::new().to_string(),
            message_type,
            message,
        }
    }

    /// Wrap any serializable payload in a new envelope.
    pub fn wrap<T: Serialize>(message_type: MessageType, payload: &T) -> Result<Self, EnvelopeError> {
        let raw = serde_json::to_string(payload).map_err(EnvelopeError::Encode)?;
        let message = RawValue::from_string(raw).map_err(EnvelopeError::Payload)?;
        Ok(Self::new(message_type, message))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(EnvelopeError::Encode)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(data).map_err(EnvelopeError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> Box<RawValue> {
        RawValue::from_string(value.to_string()).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let envelope = Envelope::new(MessageType::ContentEvent, raw(json!({"NodeID": 42})));
        let bytes = envelope.to_bytes().unwrap();
        let decoded = Envelope::from_bytes(&bytes).unwrap();

        assert_eq!(decoded.id, envelope.id);
        assert_eq!(decoded.message_type, MessageType::ContentEvent);
        assert_eq!(decoded.message.get(), envelope.message.get());
    }

    #[test]
    fn test_empty_trace_is_omitted() {
        let envelope = Envelope::new(MessageType::DeliveryRecord, raw(json!({})));
        let encoded = String::from_utf8(envelope.to_bytes().unwrap()).unwrap();
        assert!(!encoded.contains("trace"));
    }

    #[test]
    fn test_trace_round_trips() {
        let mut envelope = Envelope::new(MessageType::ContentEvent, raw(json!({})));
        envelope.trace.insert("span-id".to_string(), "abc123".to_string());

        let decoded = Envelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.trace.get("span-id").map(String::as_str), Some("abc123"));
    }

    #[test]
    fn test_unknown_message_type() {
        let decoded = Envelope::from_bytes(
            br#"{"id":"x","message_type":"not_a_thing","message":{}}"#,
        )
        .unwrap();
        assert_eq!(decoded.message_type, MessageType::Unknown);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Envelope::new(MessageType::ContentEvent, raw(json!({})));
        let b = Envelope::new(MessageType::ContentEvent, raw(json!({})));
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.len(), 26);
    }

    #[test]
    fn test_wrap_serializes_payload() {
        let envelope = Envelope::wrap(MessageType::DeliveryRecord, &json!({"Filename": "a.xml"})).unwrap();
        assert!(envelope.message.get().contains("a.xml"));
    }
}
