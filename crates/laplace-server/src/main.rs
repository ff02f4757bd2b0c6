//! LAPLACE-LHC equipment server: headless launcher.
//!
//! Runs one control server for one piece of equipment until Ctrl+C, or until
//! a client sends `STOP`.
//!
//! # Usage
//!
//! ```text
//! laplace-server [OPTIONS]
//!
//! Options:
//!   --config  <PATH>   TOML configuration file [default: laplace-server.toml]
//!   --name    <NAME>   Server name, overrides the file
//!   --address <ADDR>   Bind address, e.g. tcp://*:5555, overrides the file
//!   --freedom <N>      Degrees of freedom, overrides the file
//!   --device  <KIND>   MOTOR, CAMERA, GAS or OPT, overrides the file
//!   --empty-data-after-get   Clear the store after each GET
//!   --log-level <LEVEL>      Used when RUST_LOG is unset [default: info]
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                        | Flag                      |
//! |---------------------------------|---------------------------|
//! | `LAPLACE_CONFIG`                | `--config`                |
//! | `LAPLACE_NAME`                  | `--name`                  |
//! | `LAPLACE_ADDRESS`               | `--address`               |
//! | `LAPLACE_FREEDOM`               | `--freedom`               |
//! | `LAPLACE_DEVICE`                | `--device`                |
//! | `LAPLACE_EMPTY_DATA_AFTER_GET`  | `--empty-data-after-get`  |
//! | `LAPLACE_LOG_LEVEL`             | `--log-level`             |
//!
//! A missing config file is not an error: defaults apply, then the flags.

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use laplace_server::{load_config_or_default, Server, ServerConfig};

/// How often the launcher checks for Ctrl+C or a remote STOP.
const WATCH_INTERVAL: Duration = Duration::from_millis(200);

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Request/reply control server for one LAPLACE-LHC lab instrument.
#[derive(Debug, Parser)]
#[command(
    name = "laplace-server",
    about = "Request/reply control server for one LAPLACE-LHC lab instrument",
    version
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, default_value = "laplace-server.toml", env = "LAPLACE_CONFIG")]
    config: PathBuf,

    /// Name the server reports in every reply.
    #[arg(long, env = "LAPLACE_NAME")]
    name: Option<String>,

    /// Bind address, `tcp://<host-or-*>:<port>`.
    #[arg(long, env = "LAPLACE_ADDRESS")]
    address: Option<String>,

    /// Number of independent axes (0 for non-positional devices).
    ///
    /// Negative values are accepted here so the server can report them.
    #[arg(long, env = "LAPLACE_FREEDOM", allow_negative_numbers = true)]
    freedom: Option<i64>,

    /// Device kind: MOTOR, CAMERA, GAS or OPT.
    #[arg(long, env = "LAPLACE_DEVICE")]
    device: Option<String>,

    /// Clear the data store after every GET reply.
    #[arg(long, env = "LAPLACE_EMPTY_DATA_AFTER_GET")]
    empty_data_after_get: bool,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, default_value = "info", env = "LAPLACE_LOG_LEVEL")]
    log_level: String,
}

impl Cli {
    /// Loads the config file (or defaults) and applies the flag overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed.
    fn into_server_config(self) -> anyhow::Result<ServerConfig> {
        let mut config = load_config_or_default(&self.config)
            .with_context(|| format!("failed to load config from {}", self.config.display()))?;

        if let Some(name) = self.name {
            config.name = name;
        }
        if let Some(address) = self.address {
            config.address = address;
        }
        if let Some(freedom) = self.freedom {
            config.freedom = freedom;
        }
        if let Some(device) = self.device {
            config.device = device;
        }
        if self.empty_data_after_get {
            config.empty_data_after_get = true;
        }
        Ok(config)
    }
}

/// Logs every event so a headless server still shows what clients asked for.
fn register_logging_callbacks(server: &Server) {
    server.on_saving_path_changed(|path| {
        info!("saving path changed to {path}");
        Ok(())
    });
    server.on_position_changed(|positions| {
        info!("positions changed to {positions:?}");
        Ok(())
    });
    server.on_opt(|data| {
        info!("optional data received: {data}");
        Ok(())
    });
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // `RUST_LOG` wins over `--log-level` when both are present.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = cli.into_server_config()?;
    let server = Server::new(config).context("invalid server configuration")?;
    register_logging_callbacks(&server);
    server.start().context("failed to start server")?;

    info!(
        "server '{}' ({}) ready, clients connect to {}",
        server.name(),
        server.device(),
        server.address_for_client()
    );

    // ── Graceful shutdown flag ─────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, stopping server");
                shutdown_clone.store(true, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    while !shutdown.load(Ordering::Relaxed) && server.is_running() {
        tokio::time::sleep(WATCH_INTERVAL).await;
    }

    // The handshake blocks on a socket, so it runs off the async worker threads.
    tokio::task::spawn_blocking(move || server.stop())
        .await
        .context("stop task panicked")??;

    info!("LAPLACE-LHC server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn missing_config_path() -> String {
        std::env::temp_dir()
            .join(format!("laplace_cli_{}.toml", Uuid::new_v4()))
            .display()
            .to_string()
    }

    #[test]
    fn test_cli_defaults_produce_default_config_path() {
        let cli = Cli::parse_from(["laplace-server"]);
        assert_eq!(cli.config, PathBuf::from("laplace-server.toml"));
    }

    #[test]
    fn test_cli_defaults_leave_overrides_unset() {
        let cli = Cli::parse_from(["laplace-server"]);
        assert!(cli.name.is_none());
        assert!(cli.address.is_none());
        assert!(cli.freedom.is_none());
        assert!(cli.device.is_none());
        assert!(!cli.empty_data_after_get);
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_cli_accepts_negative_freedom() {
        let cli = Cli::parse_from(["laplace-server", "--freedom", "-1"]);
        assert_eq!(cli.freedom, Some(-1));
    }

    #[test]
    fn test_into_server_config_without_file_uses_defaults() {
        // Arrange
        let path = missing_config_path();
        let cli = Cli::parse_from(["laplace-server", "--config", &path]);

        // Act
        let config = cli.into_server_config().unwrap();

        // Assert
        assert_eq!(config.name, "Unknown");
        assert_eq!(config.address, "tcp://*:1234");
        assert_eq!(config.device, "MOTOR");
    }

    #[test]
    fn test_into_server_config_flags_override_defaults() {
        // Arrange
        let path = missing_config_path();
        let cli = Cli::parse_from([
            "laplace-server",
            "--config",
            &path,
            "--name",
            "stage-x",
            "--address",
            "tcp://*:5555",
            "--freedom",
            "3",
            "--device",
            "CAMERA",
            "--empty-data-after-get",
        ]);

        // Act
        let config = cli.into_server_config().unwrap();

        // Assert
        assert_eq!(config.name, "stage-x");
        assert_eq!(config.address, "tcp://*:5555");
        assert_eq!(config.freedom, 3);
        assert_eq!(config.device, "CAMERA");
        assert!(config.empty_data_after_get);
    }

    #[test]
    fn test_into_server_config_flags_override_file() {
        // Arrange
        let path = missing_config_path();
        std::fs::write(&path, "name = \"from-file\"\ndevice = \"GAS\"\n").unwrap();
        let cli = Cli::parse_from(["laplace-server", "--config", &path, "--name", "from-flag"]);

        // Act
        let config = cli.into_server_config().unwrap();
        let _ = std::fs::remove_file(&path);

        // Assert
        assert_eq!(config.name, "from-flag");
        assert_eq!(config.device, "GAS");
    }

    #[test]
    fn test_into_server_config_rejects_malformed_file() {
        // Arrange
        let path = missing_config_path();
        std::fs::write(&path, "[[[ not toml").unwrap();
        let cli = Cli::parse_from(["laplace-server", "--config", &path]);

        // Act
        let result = cli.into_server_config();
        let _ = std::fs::remove_file(&path);

        // Assert
        assert!(result.is_err());
    }
}
