//! JSON codec for LAPLACE-LHC protocol messages.
//!
//! Wire format: one message per transport frame, UTF-8 JSON text of a single
//! object.  There is no header and no length prefix; framing is the
//! transport's job.
//!
//! ```text
//! {"from":"client","to":"stage","cmd":"PING","payload":{"PING":null},"version":"1.0","msg":"Alive?"}
//! ```
//!
//! Decoding is split in two steps so the server can still answer a message
//! that parses as JSON but fails validation:
//!
//! 1. [`decode_value`] turns bytes into a JSON object (or a [`CodecError`]).
//! 2. [`crate::validation::validate_message`] turns that object into a
//!    [`Message`].
//!
//! [`decode`] does both for callers (clients, tests) that only care about the
//! end result.

use serde_json::Value;
use thiserror::Error;

use crate::protocol::messages::Message;
use crate::validation::{json_kind, validate_message, ValidationError};

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    /// The bytes are not well-formed UTF-8 JSON.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The bytes are valid JSON, but not an object.
    #[error("message must be an object, got {0}")]
    NotAnObject(&'static str),

    /// The object does not satisfy the message rules.
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// Serialization failed.
    #[error("could not encode message: {0}")]
    Encode(String),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`Message`] into one frame of JSON bytes.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails.
///
/// # Examples
///
/// ```rust
/// use laplace_core::protocol::{decode, encode};
/// use laplace_core::Message;
///
/// let msg = Message::ping("client", "stage");
/// let bytes = encode(&msg).unwrap();
/// assert_eq!(decode(&bytes).unwrap(), msg);
/// ```
pub fn encode(msg: &Message) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(msg).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decodes one frame into a JSON object without checking message rules.
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] for bytes that are not JSON and
/// [`CodecError::NotAnObject`] for JSON that is not an object.
pub fn decode_value(bytes: &[u8]) -> Result<Value, CodecError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(CodecError::NotAnObject(json_kind(&value)))
    }
}

/// Decodes one frame into a validated [`Message`].
///
/// # Errors
///
/// Returns [`CodecError`] if the bytes are malformed or the message fails
/// validation.
pub fn decode(bytes: &[u8]) -> Result<Message, CodecError> {
    let value = decode_value(bytes)?;
    Ok(validate_message(&value)?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
