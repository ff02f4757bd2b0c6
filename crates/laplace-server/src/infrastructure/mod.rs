//! Infrastructure layer for the server.
//!
//! Contains the OS-facing adapters: the ZeroMQ sockets, outbound address
//! detection, and the worker thread that runs the server loop.
//!
//! - `transport` – the `REP` side of the channel, behind the `ReplyTransport`
//!   trait so the loop can be tested without sockets.
//! - `client` – a `REQ` client, used by the stop handshake.
//! - `net` – which local IPv4 address a remote client should dial.
//! - `server` – the loop, the lifecycle state machine, and `Server` itself.
//!
//! **Dependency rule**: this layer may depend on `application`, `domain`, and
//! `laplace_core`, but MUST NOT be imported by the `application` or `domain`
//! layers.

pub mod client;
pub mod net;
pub mod server;
pub mod transport;
