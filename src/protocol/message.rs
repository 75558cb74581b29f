//! Inbound message type.
//!
//! The backend pushes JSON objects. The link only looks at the `type`
//! discriminator so it can be handed to listeners; everything else is the
//! listener's business.
//!
//! # Format
//!
//! ```json
//! { "type": "tts.queued", "user": "viewer42", "text": "hello chat" }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

// ============================================================================
// InboundMessage
// ============================================================================

/// A decoded message received from the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InboundMessage(Map<String, Value>);

impl InboundMessage {
    /// Decodes a text frame.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the frame is not valid JSON
    /// - [`Error::Decode`] if the JSON is not an object
    pub fn decode(text: &str) -> Result<Self> {
        match serde_json::from_str::<Value>(text)? {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::decode(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Decodes a binary frame holding UTF-8 JSON.
    ///
    /// # Errors
    ///
    /// Same as [`InboundMessage::decode`], plus [`Error::Decode`] for invalid UTF-8.
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| Error::decode(format!("binary frame is not UTF-8: {e}")))?;
        Self::decode(text)
    }

    /// Returns the `type` discriminator, if present and a string.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    /// Returns a top-level field.
    #[inline]
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Returns the underlying JSON object.
    #[inline]
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consumes the message into its JSON object.
    #[inline]
    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Deserializes the message into a consumer-defined payload type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the payload does not match `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(T::deserialize(Value::Object(self.0.clone()))?)
    }
}

impl From<Map<String, Value>> for InboundMessage {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Names a JSON value's kind for decode diagnostics.
fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_object() {
        let message = InboundMessage::decode(r#"{"type":"x","n":1}"#).expect("decode");
        assert_eq!(message.kind(), Some("x"));
        assert_eq!(message.get("n"), Some(&Value::from(1)));
    }

    #[test]
    fn test_decode_without_type() {
        let message = InboundMessage::decode(r#"{"volume":0.5}"#).expect("decode");
        assert_eq!(message.kind(), None);
    }

    #[test]
    fn test_non_string_type_is_not_a_kind() {
        let message = InboundMessage::decode(r#"{"type":5}"#).expect("decode");
        assert_eq!(message.kind(), None);
    }

    #[test]
    fn test_decode_rejects_invalid_json() {
        let err = InboundMessage::decode("{not json").unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_decode_rejects_non_object() {
        let err = InboundMessage::decode("[1,2,3]").unwrap_err();
        assert!(err.to_string().contains("an array"));
        assert!(err.is_decode_error());
    }

    #[test]
    fn test_decode_bytes() {
        let message = InboundMessage::decode_bytes(br#"{"type":"avatar.changed"}"#).expect("decode");
        assert_eq!(message.kind(), Some("avatar.changed"));

        let err = InboundMessage::decode_bytes(&[0xff, 0xfe]).unwrap_err();
        assert!(err.is_decode_error());
    }

    #[test]
    fn test_parse_typed_payload() {
        #[derive(Deserialize)]
        struct Queued {
            user: String,
            text: String,
        }

        let message =
            InboundMessage::decode(r#"{"type":"tts.queued","user":"viewer42","text":"hi"}"#)
                .expect("decode");
        let queued: Queued = message.parse().expect("parse");
        assert_eq!(queued.user, "viewer42");
        assert_eq!(queued.text, "hi");
    }
}
