//! laplace-server library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::events::EventKind;
pub use domain::config::{load_config, load_config_or_default, ServerConfig, ServerSettings};
pub use infrastructure::client::{ClientError, RequestClient};
pub use infrastructure::server::{LoopState, Server, ServerError, ShutdownError};
