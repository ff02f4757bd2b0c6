//! All LAPLACE-LHC protocol message types.
//!
//! Every request and every reply on the wire is one [`Message`]: a JSON object
//! with the fields `from`, `to`, `cmd`, `payload`, `version`, and the optional
//! `error_msg` / `msg`.  The `cmd` field carries one of the [`Command`] tokens.
//!
//! The constructors in this module stamp [`PROTOCOL_VERSION`] on every message
//! and always fill `payload` (with `{}` when the command carries no data), so a
//! message built here is valid by construction.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::domain::device::Device;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current protocol version string.  Compared for exact equality; there is no
/// negotiation.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Token used in error replies when the offending message had no usable `cmd`
/// or `from` field.
pub const UNKNOWN_TOKEN: &str = "UNKNOWN";

/// Payload key carried by `SAVE` requests.
pub const PATH_KEY: &str = "path";
/// Payload key carried by `SET` requests.
pub const POSITIONS_KEY: &str = "positions";
/// Payload key carried by `INFO_OPT` requests and `GET` replies.
pub const DATA_KEY: &str = "data";

/// The `payload` mapping of a [`Message`].
pub type Payload = Map<String, Value>;

// ── Command tokens ────────────────────────────────────────────────────────────

/// All command tokens defined by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Command {
    #[serde(rename = "INFO")]
    Info,
    #[serde(rename = "PING")]
    Ping,
    #[serde(rename = "GET")]
    Get,
    #[serde(rename = "SAVE")]
    Save,
    #[serde(rename = "SET")]
    Set,
    #[serde(rename = "INFO_OPT")]
    Opt,
    #[serde(rename = "STOP")]
    Stop,
    /// Synthetic category used only by error replies.
    #[serde(rename = "ERROR")]
    Error,
}

impl Command {
    /// Every command a request may carry, in the order servers advertise them.
    pub const REQUESTS: [Command; 7] = [
        Command::Info,
        Command::Ping,
        Command::Get,
        Command::Set,
        Command::Save,
        Command::Stop,
        Command::Opt,
    ];

    /// Returns the wire token for this command.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Info => "INFO",
            Command::Ping => "PING",
            Command::Get => "GET",
            Command::Save => "SAVE",
            Command::Set => "SET",
            Command::Opt => "INFO_OPT",
            Command::Stop => "STOP",
            Command::Error => "ERROR",
        }
    }
}

impl TryFrom<&str> for Command {
    type Error = ();

    fn try_from(token: &str) -> Result<Self, ()> {
        match token {
            "INFO" => Ok(Command::Info),
            "PING" => Ok(Command::Ping),
            "GET" => Ok(Command::Get),
            "SAVE" => Ok(Command::Save),
            "SET" => Ok(Command::Set),
            "INFO_OPT" => Ok(Command::Opt),
            "STOP" => Ok(Command::Stop),
            "ERROR" => Ok(Command::Error),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── The message ───────────────────────────────────────────────────────────────

/// The unit exchanged on the wire: one per request, one per reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Identifies the sender.  Required and non-empty on requests.
    pub from: String,
    /// Intended recipient; informational only (the server does not route).
    #[serde(default)]
    pub to: String,
    /// Command token.  Kept as a string so unknown tokens survive decoding
    /// and can be answered with an error reply.
    pub cmd: String,
    /// Command data.  Never absent on the wire: an empty map is `{}`.
    pub payload: Payload,
    /// Protocol version; must equal [`PROTOCOL_VERSION`].
    pub version: String,
    /// Present only on error replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    /// Optional human-readable note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl Message {
    /// Builds a message with the current protocol version and no notes.
    pub fn new(
        cmd: impl Into<String>,
        sender: impl Into<String>,
        target: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            from: sender.into(),
            to: target.into(),
            cmd: cmd.into(),
            payload,
            version: PROTOCOL_VERSION.to_string(),
            error_msg: None,
            msg: None,
        }
    }

    /// Sets the human-readable `msg` note.
    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = Some(msg.into());
        self
    }

    /// Returns the parsed [`Command`] for `cmd`, or `None` if the token is not
    /// one the protocol defines.
    pub fn command(&self) -> Option<Command> {
        Command::try_from(self.cmd.as_str()).ok()
    }

    /// Returns `true` if this is an error reply.
    pub fn is_error(&self) -> bool {
        self.error_msg.is_some()
    }

    // ── PING ──────────────────────────────────────────────────────────────────

    /// PING request: `{"PING": null}`.
    pub fn ping(sender: &str, target: &str) -> Self {
        Self::new(Command::Ping.as_str(), sender, target, payload_of([("PING", Value::Null)]))
            .with_msg("Alive?")
    }

    /// PING reply: `{"PING": "PONG"}`.
    pub fn pong(sender: &str, target: &str) -> Self {
        Self::new(Command::Ping.as_str(), sender, target, payload_of([("PING", json!("PONG"))]))
            .with_msg("Still alive.")
    }

    // ── INFO ──────────────────────────────────────────────────────────────────

    /// INFO request (empty payload).
    pub fn info_request(sender: &str, target: &str) -> Self {
        Self::new(Command::Info.as_str(), sender, target, Payload::new())
            .with_msg("Informations required.")
    }

    /// INFO reply describing the device behind the server.
    pub fn info_reply(
        sender: &str,
        target: &str,
        device: Device,
        freedom: u32,
        name: &str,
        capabilities: &[Command],
    ) -> Self {
        let tokens: Vec<Value> = capabilities.iter().map(|c| json!(c.as_str())).collect();
        let payload = payload_of([
            ("device", json!(device.as_str())),
            ("freedom", json!(freedom)),
            ("name", json!(name)),
            ("capabilities", Value::Array(tokens)),
        ]);
        Self::new(Command::Info.as_str(), sender, target, payload)
            .with_msg("Informations transmitted.")
    }

    // ── GET ───────────────────────────────────────────────────────────────────

    /// GET request (empty payload).
    pub fn get_request(sender: &str, target: &str) -> Self {
        Self::new(Command::Get.as_str(), sender, target, Payload::new())
            .with_msg("Data required.")
    }

    /// GET reply carrying a copy of the store under `data`.
    pub fn get_reply(sender: &str, target: &str, data: Payload) -> Self {
        Self::new(
            Command::Get.as_str(),
            sender,
            target,
            payload_of([(DATA_KEY, Value::Object(data))]),
        )
        .with_msg("Data transmitted.")
    }

    // ── SAVE ──────────────────────────────────────────────────────────────────

    /// SAVE request asking the device to record to `path`.
    pub fn save_request(sender: &str, target: &str, path: &str) -> Self {
        Self::new(Command::Save.as_str(), sender, target, payload_of([(PATH_KEY, json!(path))]))
            .with_msg("Saving path transmitted.")
    }

    /// SAVE acknowledgement.
    pub fn save_reply(sender: &str, target: &str) -> Self {
        Self::new(Command::Save.as_str(), sender, target, Payload::new())
            .with_msg("Saving path changed.")
    }

    // ── SET ───────────────────────────────────────────────────────────────────

    /// SET request carrying the target positions, one per degree of freedom.
    pub fn set_request(sender: &str, target: &str, positions: Vec<Value>) -> Self {
        Self::new(
            Command::Set.as_str(),
            sender,
            target,
            payload_of([(POSITIONS_KEY, Value::Array(positions))]),
        )
        .with_msg("Positions transmitted.")
    }

    /// SET acknowledgement.
    pub fn set_reply(sender: &str, target: &str) -> Self {
        Self::new(Command::Set.as_str(), sender, target, Payload::new())
            .with_msg("Positions changed.")
    }

    // ── INFO_OPT ──────────────────────────────────────────────────────────────

    /// INFO_OPT update carrying arbitrary optics data.
    pub fn opt_request(sender: &str, target: &str, data: Value) -> Self {
        Self::new(Command::Opt.as_str(), sender, target, payload_of([(DATA_KEY, data)]))
            .with_msg("Optics data transmitted.")
    }

    /// INFO_OPT acknowledgement.
    pub fn opt_reply(sender: &str, target: &str) -> Self {
        Self::new(Command::Opt.as_str(), sender, target, Payload::new())
            .with_msg("Optics data received.")
    }

    // ── STOP ──────────────────────────────────────────────────────────────────

    /// STOP request.
    pub fn stop_request(sender: &str, target: &str) -> Self {
        Self::new(Command::Stop.as_str(), sender, target, Payload::new())
            .with_msg("Stop required.")
    }

    /// STOP acknowledgement, sent before the server tears down.
    pub fn stop_reply(sender: &str, target: &str) -> Self {
        Self::new(Command::Stop.as_str(), sender, target, Payload::new())
            .with_msg("Stopping.")
    }

    // ── ERROR ─────────────────────────────────────────────────────────────────

    /// Error reply.  Echoes the offending `cmd` token, carries a non-empty
    /// `error_msg`, and no payload.
    pub fn error(sender: &str, target: &str, cmd: &str, error_msg: &str) -> Self {
        let error_msg = if error_msg.is_empty() { "Unspecified error" } else { error_msg };
        Self {
            error_msg: Some(error_msg.to_string()),
            ..Self::new(cmd, sender, target, Payload::new())
        }
    }
}

/// Builds a payload map from `(key, value)` pairs.
fn payload_of<const N: usize>(entries: [(&str, Value); N]) -> Payload {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_tokens_match_wire_names() {
        assert_eq!(Command::Opt.as_str(), "INFO_OPT");
        assert_eq!(Command::Stop.to_string(), "STOP");
    }

    #[test]
    fn test_command_try_from_accepts_every_token() {
        for cmd in Command::REQUESTS {
            assert_eq!(Command::try_from(cmd.as_str()), Ok(cmd));
        }
        assert_eq!(Command::try_from("ERROR"), Ok(Command::Error));
    }

    #[test]
    fn test_command_try_from_rejects_unknown_and_lowercase() {
        assert_eq!(Command::try_from("DANCE"), Err(()));
        assert_eq!(Command::try_from("ping"), Err(()));
        assert_eq!(Command::try_from("OPT"), Err(()));
    }

    #[test]
    fn test_command_serializes_as_token() {
        let json = serde_json::to_string(&Command::Opt).unwrap();
        assert_eq!(json, "\"INFO_OPT\"");
    }

    #[test]
    fn test_constructors_stamp_version_and_payload() {
        let messages = [
            Message::info_request("a", "b"),
            Message::get_request("a", "b"),
            Message::save_reply("a", "b"),
            Message::set_reply("a", "b"),
            Message::opt_reply("a", "b"),
            Message::stop_request("a", "b"),
            Message::stop_reply("a", "b"),
        ];
        for msg in messages {
            assert_eq!(msg.version, PROTOCOL_VERSION);
            assert!(msg.payload.is_empty(), "{} must carry an empty payload", msg.cmd);
            assert!(msg.error_msg.is_none());
        }
    }

    #[test]
    fn test_ping_and_pong_payloads() {
        let ping = Message::ping("client", "srv");
        assert_eq!(ping.payload.get("PING"), Some(&Value::Null));

        let pong = Message::pong("srv", "client");
        assert_eq!(pong.payload.get("PING"), Some(&json!("PONG")));
        assert_eq!(pong.msg.as_deref(), Some("Still alive."));
    }

    #[test]
    fn test_info_reply_lists_capabilities_in_order() {
        let msg = Message::info_reply("srv", "client", Device::Motor, 3, "stage", &Command::REQUESTS);
        assert_eq!(msg.payload["device"], json!("MOTOR"));
        assert_eq!(msg.payload["freedom"], json!(3));
        assert_eq!(msg.payload["name"], json!("stage"));
        assert_eq!(
            msg.payload["capabilities"],
            json!(["INFO", "PING", "GET", "SET", "SAVE", "STOP", "INFO_OPT"])
        );
    }

    #[test]
    fn test_get_reply_wraps_store_under_data() {
        let mut data = Payload::new();
        data.insert("a".to_string(), json!(1));
        let msg = Message::get_reply("srv", "client", data);
        assert_eq!(msg.payload[DATA_KEY], json!({"a": 1}));
    }

    #[test]
    fn test_error_reply_echoes_cmd_and_has_no_payload() {
        // Arrange / Act
        let msg = Message::error("srv", "client", "SAVE", "Payload missing keys: [\"path\"].");

        // Assert
        assert_eq!(msg.cmd, "SAVE");
        assert!(msg.payload.is_empty());
        assert!(msg.is_error());
        assert!(msg.msg.is_none());
    }

    #[test]
    fn test_error_reply_never_has_empty_error_msg() {
        let msg = Message::error("srv", "client", "PING", "");
        assert!(!msg.error_msg.unwrap().is_empty());
    }

    #[test]
    fn test_command_lookup_on_message() {
        assert_eq!(Message::ping("a", "b").command(), Some(Command::Ping));
        let unknown = Message::new("DANCE", "a", "b", Payload::new());
        assert_eq!(unknown.command(), None);
    }
}
