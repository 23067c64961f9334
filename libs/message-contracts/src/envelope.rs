//! JSON envelope codec.
//!
//! Payloads travel as UTF-8 JSON; type identity is carried next to the body
//! as a plain name string (the stream record key, or the `Event` envelope's
//! `event_type` field on the queue side), never as a language-level schema.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to serialize payload: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to deserialize payload: {0}")]
    Deserialize(#[source] serde_json::Error),

    /// The payload has no identity property under the `id` / `Id` convention.
    #[error("payload carries no message id property")]
    MissingMessageId,
}

/// Serialize a payload to its wire form.
pub fn encode<T: Serialize>(value: &T) -> Result<String, CodecError> {
    serde_json::to_string(value).map_err(CodecError::Serialize)
}

/// Deserialize a wire payload into a handler input type.
pub fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, CodecError> {
    serde_json::from_str(raw).map_err(CodecError::Deserialize)
}

/// Read the message identity from a raw payload by convention: the first of
/// the JSON fields `id` and `Id` that is present. String and integer ids are
/// both accepted; integers are rendered in decimal.
pub fn extract_message_id(raw: &str) -> Result<String, CodecError> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(CodecError::Deserialize)?;
    let id = value.get("id").or_else(|| value.get("Id"));
    match id {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
        _ => Err(CodecError::MissingMessageId),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        id: String,
        seq: u64,
    }

    #[test]
    fn round_trips_handler_input_types() {
        let ping = Ping { id: "p-1".into(), seq: 42 };
        let raw = encode(&ping).unwrap();
        let back: Ping = decode(&raw).unwrap();
        assert_eq!(back, ping);
    }

    #[test]
    fn extracts_lowercase_and_pascal_ids() {
        assert_eq!(extract_message_id(r#"{"id":"m1"}"#).unwrap(), "m1");
        assert_eq!(extract_message_id(r#"{"Id":"m2"}"#).unwrap(), "m2");
        assert_eq!(extract_message_id(r#"{"id":7}"#).unwrap(), "7");
    }

    #[test]
    fn missing_id_is_an_error() {
        assert!(matches!(
            extract_message_id(r#"{"name":"x"}"#),
            Err(CodecError::MissingMessageId)
        ));
        assert!(matches!(
            extract_message_id(r#"{"id":""}"#),
            Err(CodecError::MissingMessageId)
        ));
    }
}
