//! Validation rules for server construction parameters and inbound messages.
//!
//! Two very different kinds of check live here:
//!
//! - **Construction-time checks** ([`validate_address`], [`validate_freedom`],
//!   [`validate_device`]) run once when a server is built.  A failure is a
//!   configuration mistake and aborts construction with a
//!   [`ConfigurationError`]; the server is never created in an invalid state.
//!
//! - **Per-message checks** ([`validate_message`], [`validate_payload`]) run for
//!   every request.  A failure is a protocol error: the server answers with an
//!   error reply built from the [`ValidationError`] and keeps running.

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::domain::address::BindAddress;
use crate::domain::device::Device;
use crate::protocol::messages::{Message, UNKNOWN_TOKEN, PROTOCOL_VERSION};

/// Invalid server construction parameters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// The address does not use the `tcp://` scheme.
    #[error("server address must use the 'tcp' protocol (start with 'tcp://'), got '{0}'")]
    InvalidScheme(String),

    /// The address has no `:<port>` suffix.
    #[error("server address '{0}' has no port; expected 'tcp://<host-or-*>:<port>'")]
    MissingPort(String),

    /// The address has an empty host part.
    #[error("server address '{0}' has an empty host; use '*' to listen on every interface")]
    EmptyHost(String),

    /// The port is not a number in `1..=65535`.
    #[error("server address '{address}' has an invalid port '{port}'")]
    InvalidPort { address: String, port: String },

    /// Degrees of freedom must be `>= 0`.
    #[error("'freedom' must be positive (>= 0), not {0}")]
    NegativeFreedom(i64),

    /// Degrees of freedom does not fit the protocol's integer range.
    #[error("'freedom' is too large: {0}")]
    FreedomOutOfRange(i64),

    /// The device is not part of the fixed enumeration.
    #[error("invalid device '{device}'; choose among {available:?}")]
    UnknownDevice {
        device: String,
        available: Vec<&'static str>,
    },
}

/// A well-formed message that fails the schema, version, or payload checks.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The decoded value is not a JSON object.
    #[error("message must be an object, got {0}")]
    NotAnObject(&'static str),

    /// The `version` field is missing or differs from [`PROTOCOL_VERSION`].
    #[error("protocol version mismatch: expected {expected}, got {received}")]
    VersionMismatch { expected: String, received: String },

    /// The `cmd` field is missing, empty, or not a string.
    #[error("'message' must contain a non-empty 'cmd' field")]
    MissingCmd,

    /// The `from` field is missing, empty, or not a string.
    #[error("'message' must contain a non-empty 'from' field")]
    MissingFrom,

    /// The `payload` field is absent.
    #[error("'message' must contain a 'payload' field")]
    MissingPayload,

    /// The `payload` field is present but not a mapping.
    #[error("'payload' must be a mapping, got {0}")]
    PayloadNotAMapping(&'static str),

    /// Some other field has the wrong type (e.g. `to` is a number).
    #[error("message does not match the schema: {0}")]
    Schema(String),

    /// The payload lacks keys the command requires.
    #[error("payload missing keys: {missing:?}")]
    MissingKeys { missing: Vec<String> },

    /// A payload value has the wrong type for the command.
    #[error("payload key '{key}' must be {expected}")]
    WrongType { key: String, expected: &'static str },
}

// ── Construction-time checks ──────────────────────────────────────────────────

/// Checks that `address` is `tcp://<host-or-*>:<port>`.
///
/// # Errors
///
/// Returns the [`ConfigurationError`] describing the first violated rule.
pub fn validate_address(address: &str) -> Result<BindAddress, ConfigurationError> {
    BindAddress::parse(address)
}

/// Checks that `freedom` is a non-negative integer and narrows it.
///
/// # Errors
///
/// Returns [`ConfigurationError::NegativeFreedom`] for negative values and
/// [`ConfigurationError::FreedomOutOfRange`] for values above `u32::MAX`.
pub fn validate_freedom(freedom: i64) -> Result<u32, ConfigurationError> {
    if freedom < 0 {
        return Err(ConfigurationError::NegativeFreedom(freedom));
    }
    u32::try_from(freedom).map_err(|_| ConfigurationError::FreedomOutOfRange(freedom))
}

/// Checks that `device` names one of the supported devices.
///
/// # Errors
///
/// Returns [`ConfigurationError::UnknownDevice`] listing the valid names.
pub fn validate_device(device: &str) -> Result<Device, ConfigurationError> {
    Device::try_from(device).map_err(|_| ConfigurationError::UnknownDevice {
        device: device.to_string(),
        available: Device::ALL.iter().map(Device::as_str).collect(),
    })
}

// ── Per-message checks ────────────────────────────────────────────────────────

/// Checks the structure and version of a decoded value and converts it into a
/// [`Message`].
///
/// Rules, in order: the value is an object; `version` equals
/// [`PROTOCOL_VERSION`]; `cmd` and `from` are non-empty strings; `payload` is
/// present (an empty map is valid) and is a mapping.
///
/// # Errors
///
/// Returns the [`ValidationError`] for the first violated rule.
pub fn validate_message(value: &Value) -> Result<Message, ValidationError> {
    let result = check_message(value);
    if let Err(e) = &result {
        debug!("message rejected: {e}");
    }
    result
}

fn check_message(value: &Value) -> Result<Message, ValidationError> {
    let obj = value
        .as_object()
        .ok_or_else(|| ValidationError::NotAnObject(json_kind(value)))?;

    match obj.get("version") {
        Some(Value::String(v)) if v == PROTOCOL_VERSION => {}
        other => {
            return Err(ValidationError::VersionMismatch {
                expected: PROTOCOL_VERSION.to_string(),
                received: describe_version(other),
            })
        }
    }

    if non_empty_str(obj.get("cmd")).is_none() {
        return Err(ValidationError::MissingCmd);
    }
    if non_empty_str(obj.get("from")).is_none() {
        return Err(ValidationError::MissingFrom);
    }

    match obj.get("payload") {
        None => return Err(ValidationError::MissingPayload),
        Some(Value::Object(_)) => {}
        Some(other) => return Err(ValidationError::PayloadNotAMapping(json_kind(other))),
    }

    serde_json::from_value(value.clone()).map_err(|e| ValidationError::Schema(e.to_string()))
}

/// Checks that `message.payload` contains every key in `expected_keys`.
///
/// # Errors
///
/// Returns [`ValidationError::MissingKeys`] naming every absent key, in the
/// order they were expected.
pub fn validate_payload(message: &Message, expected_keys: &[&str]) -> Result<(), ValidationError> {
    let missing: Vec<String> = expected_keys
        .iter()
        .filter(|k| !message.payload.contains_key(**k))
        .map(|k| k.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::MissingKeys { missing })
    }
}

/// Returns the string stored at `key`, which must already be known to exist.
///
/// # Errors
///
/// Returns [`ValidationError::WrongType`] when the value is not a string (or
/// [`ValidationError::MissingKeys`] when it is absent).
pub fn payload_str<'a>(message: &'a Message, key: &str) -> Result<&'a str, ValidationError> {
    match message.payload.get(key) {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(ValidationError::WrongType {
            key: key.to_string(),
            expected: "a string",
        }),
        None => Err(ValidationError::MissingKeys {
            missing: vec![key.to_string()],
        }),
    }
}

/// Returns the list stored at `key`.
///
/// # Errors
///
/// Returns [`ValidationError::WrongType`] when the value is not a list (or
/// [`ValidationError::MissingKeys`] when it is absent).
pub fn payload_list<'a>(message: &'a Message, key: &str) -> Result<&'a [Value], ValidationError> {
    match message.payload.get(key) {
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(ValidationError::WrongType {
            key: key.to_string(),
            expected: "a list",
        }),
        None => Err(ValidationError::MissingKeys {
            missing: vec![key.to_string()],
        }),
    }
}

/// Best-effort recovery of `(cmd, from)` from a value that failed validation,
/// so the error reply can still be addressed.  Falls back to `"UNKNOWN"`.
pub fn recover_identity(value: &Value) -> (String, String) {
    let field = |name: &str| {
        non_empty_str(value.get(name))
            .unwrap_or(UNKNOWN_TOKEN)
            .to_string()
    };
    (field("cmd"), field("from"))
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn describe_version(value: Option<&Value>) -> String {
    match value {
        None => "none".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Names the JSON type of `value` for error messages.
pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
