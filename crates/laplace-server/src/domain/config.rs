//! Server configuration: the raw, user-editable settings and their validated
//! runtime form.
//!
//! # Two types, two jobs (for beginners)
//!
//! [`ServerConfig`] is what a human writes.  It is loaded from a TOML file (or
//! built in code) and can hold *anything*, including a negative `freedom` or
//! an `http://` address.  That is on purpose – it lets the loader succeed and
//! the validator report exactly what is wrong.
//!
//! [`ServerSettings`] is what the server runs with.  It can only be produced by
//! [`ServerConfig::validate`], which applies the construction-time checks from
//! [`laplace_core::validation`].  Holding a `ServerSettings` proves the
//! parameters are valid.
//!
//! Example file:
//!
//! ```toml
//! name = "stage-x"
//! address = "tcp://*:5555"
//! freedom = 3
//! device = "MOTOR"
//! empty_data_after_get = false
//!
//! [data]
//! units = "mm"
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the field is absent from the TOML file, so an empty
//! file yields [`ServerConfig::default()`].

use std::path::Path;
use std::time::Duration;

use laplace_core::validation::{validate_address, validate_device, validate_freedom};
use laplace_core::{BindAddress, Command, ConfigurationError, Device, Payload};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Raw configuration ─────────────────────────────────────────────────────────

/// Server construction parameters, as written by a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Identity used as `from` in every reply.
    #[serde(default = "default_name")]
    pub name: String,
    /// Bind address, `tcp://<host-or-*>:<port>`.
    #[serde(default = "default_address")]
    pub address: String,
    /// Degrees of freedom of the device; must be `>= 0`.
    #[serde(default)]
    pub freedom: i64,
    /// One of `MOTOR`, `CAMERA`, `GAS`, `OPT`.
    #[serde(default = "default_device")]
    pub device: String,
    /// Initial contents of the shared data store.
    #[serde(default)]
    pub data: Payload,
    /// Clear the store after every `GET` reply.
    #[serde(default)]
    pub empty_data_after_get: bool,
    /// How long one socket poll waits for a request.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Pause between polls that found nothing.
    #[serde(default = "default_sleep_interval_ms")]
    pub sleep_interval_ms: u64,
    /// Bound on each wait of the stop handshake.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_name() -> String {
    "Unknown".to_string()
}
fn default_address() -> String {
    "tcp://*:1234".to_string()
}
fn default_device() -> String {
    Device::Motor.as_str().to_string()
}
fn default_poll_timeout_ms() -> u64 {
    100
}
fn default_sleep_interval_ms() -> u64 {
    10
}
fn default_stop_timeout_ms() -> u64 {
    2_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            address: default_address(),
            freedom: 0,
            device: default_device(),
            data: Payload::new(),
            empty_data_after_get: false,
            poll_timeout_ms: default_poll_timeout_ms(),
            sleep_interval_ms: default_sleep_interval_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

impl ServerConfig {
    /// Applies the construction-time checks and returns the runtime settings.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigurationError`] for the first invalid parameter
    /// (address, then freedom, then device).
    pub fn validate(&self) -> Result<ServerSettings, ConfigurationError> {
        let address = validate_address(&self.address)?;
        let freedom = validate_freedom(self.freedom)?;
        let device = validate_device(&self.device)?;

        Ok(ServerSettings {
            name: self.name.clone(),
            address,
            device,
            freedom,
            capabilities: Command::REQUESTS.to_vec(),
            empty_data_after_get: self.empty_data_after_get,
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            sleep_interval: Duration::from_millis(self.sleep_interval_ms),
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
        })
    }
}

// ── Validated settings ────────────────────────────────────────────────────────

/// Validated, immutable parameters of a running server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    pub name: String,
    pub address: BindAddress,
    pub device: Device,
    pub freedom: u32,
    /// Commands the server accepts, in the order INFO advertises them.
    pub capabilities: Vec<Command>,
    pub empty_data_after_get: bool,
    pub poll_timeout: Duration,
    pub sleep_interval: Duration,
    pub stop_timeout: Duration,
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Loads a [`ServerConfig`] from the TOML file at `path`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read, and
/// [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

/// Like [`load_config`], but returns `ServerConfig::default()` when the file
/// does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_or_default(path: &Path) -> Result<ServerConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path` as pretty-printed TOML.
///
/// # Errors
///
/// Returns [`ConfigError::Serialize`] if serialization fails and
/// [`ConfigError::Io`] if the file cannot be written.
pub fn save_config(config: &ServerConfig, path: &Path) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn scratch_file() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("laplace_cfg_{}.toml", Uuid::new_v4()))
    }

    // ── Defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn test_server_config_default_values() {
        // Arrange / Act
        let cfg = ServerConfig::default();

        // Assert
        assert_eq!(cfg.name, "Unknown");
        assert_eq!(cfg.address, "tcp://*:1234");
        assert_eq!(cfg.freedom, 0);
        assert_eq!(cfg.device, "MOTOR");
        assert!(cfg.data.is_empty());
        assert!(!cfg.empty_data_after_get);
        assert_eq!(cfg.poll_timeout_ms, 100);
        assert_eq!(cfg.sleep_interval_ms, 10);
    }

    #[test]
    fn test_deserialize_empty_toml_uses_defaults() {
        let cfg: ServerConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, ServerConfig::default());
    }

    #[test]
    fn test_deserialize_partial_toml_overrides_defaults() {
        // Arrange
        let toml_str = r#"
name = "camera-1"
device = "CAMERA"

[data]
exposure = 0.01
roi = { x = 10, y = 20 }
"#;

        // Act
        let cfg: ServerConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.name, "camera-1");
        assert_eq!(cfg.device, "CAMERA");
        assert_eq!(cfg.address, "tcp://*:1234");
        assert_eq!(cfg.data["exposure"], json!(0.01));
        assert_eq!(cfg.data["roi"], json!({"x": 10, "y": 20}));
    }

    #[test]
    fn test_deserialize_invalid_toml_returns_error() {
        let result: Result<ServerConfig, toml::de::Error> = toml::from_str("[[[ nope");
        assert!(result.is_err());
    }

    // ── Validation ────────────────────────────────────────────────────────────

    #[test]
    fn test_validate_produces_runtime_settings() {
        // Arrange
        let cfg = ServerConfig {
            name: "stage".to_string(),
            address: "tcp://127.0.0.1:5555".to_string(),
            freedom: 3,
            poll_timeout_ms: 50,
            ..ServerConfig::default()
        };

        // Act
        let settings = cfg.validate().expect("valid config");

        // Assert
        assert_eq!(settings.address.port(), 5555);
        assert_eq!(settings.device, Device::Motor);
        assert_eq!(settings.freedom, 3);
        assert_eq!(settings.poll_timeout, Duration::from_millis(50));
        assert_eq!(settings.capabilities, Command::REQUESTS.to_vec());
    }

    #[test]
    fn test_validate_rejects_bad_scheme() {
        let cfg = ServerConfig {
            address: "udp://*:1234".to_string(),
            ..ServerConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigurationError::InvalidScheme(_))));
    }

    #[test]
    fn test_validate_rejects_negative_freedom() {
        let cfg = ServerConfig {
            freedom: -2,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigurationError::NegativeFreedom(-2)));
    }

    #[test]
    fn test_validate_rejects_unknown_device() {
        let cfg = ServerConfig {
            device: "motor".to_string(),
            ..ServerConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigurationError::UnknownDevice { .. })));
    }

    // ── File I/O ──────────────────────────────────────────────────────────────

    #[test]
    fn test_save_and_load_config_round_trip() {
        // Arrange
        let path = scratch_file();
        let mut cfg = ServerConfig {
            name: "gas-1".to_string(),
            device: "GAS".to_string(),
            empty_data_after_get: true,
            ..ServerConfig::default()
        };
        cfg.data.insert("flow".to_string(), json!(1.5));

        // Act
        save_config(&cfg, &path).expect("save");
        let loaded = load_config(&path).expect("load");

        // Assert
        assert_eq!(loaded, cfg);

        // Cleanup
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_load_config_missing_file_is_io_error() {
        let path = scratch_file();
        assert!(matches!(load_config(&path), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_load_config_or_default_missing_file_is_default() {
        let path = scratch_file();
        let cfg = load_config_or_default(&path).expect("missing file is not an error");
        assert_eq!(cfg, ServerConfig::default());
    }

    #[test]
    fn test_load_config_or_default_reports_parse_errors() {
        // Arrange
        let path = scratch_file();
        std::fs::write(&path, "freedom = \"many\"").unwrap();

        // Act
        let result = load_config_or_default(&path);

        // Assert
        assert!(matches!(result, Err(ConfigError::Parse(_))));
        std::fs::remove_file(&path).ok();
    }
}
