//! # laplace-core
//!
//! Shared library for the LAPLACE-LHC equipment control server containing the
//! wire protocol, the JSON codec, the device catalogue and the validation rules.
//!
//! This crate is used by the server and by any client that wants to talk to it.
//! It has zero dependencies on sockets, threads, or OS APIs.
//!
//! # Architecture overview (for beginners)
//!
//! Every lab instrument (a motor stage, a camera, a gas controller, an optics
//! unit) is fronted by one small server.  A client sends one framed command at
//! a time and waits for exactly one reply before it may send the next one.
//!
//! This crate (`laplace-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – How bytes travel over the network.  Each request and each
//!   reply is a single JSON object (a [`Message`]) with a fixed set of fields.
//!   Constructors build the canonical message for every command.
//!
//! - **`domain`** – The vocabulary of the server: which devices exist
//!   ([`Device`]) and what a valid bind address looks like ([`BindAddress`]).
//!
//! - **`validation`** – The rules a message must satisfy before the server acts
//!   on it, and the rules the server's own construction parameters must satisfy.

pub mod domain;
pub mod protocol;
pub mod validation;

// Re-export the most-used types at the crate root so callers can write
// `laplace_core::Message` instead of `laplace_core::protocol::messages::Message`.
pub use domain::address::BindAddress;
pub use domain::device::Device;
pub use protocol::codec::{decode, decode_value, encode, CodecError};
pub use protocol::messages::{Command, Message, Payload, PROTOCOL_VERSION};
pub use validation::{ConfigurationError, ValidationError};
