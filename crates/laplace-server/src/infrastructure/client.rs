//! A blocking ZeroMQ `REQ` client.
//!
//! Used by the server itself for the stop handshake, and by tools and tests
//! that want to talk to a server without writing socket code.
//!
//! Every receive is bounded by the timeout given to [`RequestClient::connect`].
//! After a timeout the `REQ` socket is still waiting for a reply it will never
//! get, so the client should be dropped and a new one connected.

use std::time::Duration;

use laplace_core::{encode, CodecError, Message};
use thiserror::Error;
use tracing::trace;

use crate::infrastructure::transport::TransportError;

/// Errors raised while performing a request.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The socket failed or timed out.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The request could not be encoded or the reply could not be decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// A connected `REQ` socket with bounded send and receive.
pub struct RequestClient {
    socket: zmq::Socket,
    _context: zmq::Context,
    endpoint: String,
}

impl RequestClient {
    /// Connects a new `REQ` socket to `endpoint`.
    ///
    /// ZeroMQ connects lazily, so this succeeds even when nothing is listening
    /// yet; a missing server surfaces as [`TransportError::TimedOut`] on the
    /// first request.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] for a malformed endpoint.
    pub fn connect(endpoint: &str, timeout: Duration) -> Result<Self, TransportError> {
        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let context = zmq::Context::new();
        let socket = context.socket(zmq::REQ)?;
        socket.set_linger(0)?;
        socket.set_rcvtimeo(timeout_ms)?;
        socket.set_sndtimeo(timeout_ms)?;
        socket.connect(endpoint).map_err(|source| TransportError::Connect {
            endpoint: endpoint.to_string(),
            source,
        })?;
        Ok(Self {
            socket,
            _context: context,
            endpoint: endpoint.to_string(),
        })
    }

    /// Returns the endpoint this client is connected to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Sends `frame` as-is and returns the raw reply frame.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::TimedOut`] when no reply arrives in time.
    pub fn request_raw(&self, frame: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.socket.send(frame, 0)?;
        let reply = self.socket.recv_bytes(0)?;
        trace!("{} replied with {} bytes", self.endpoint, reply.len());
        Ok(reply)
    }

    /// Sends `msg` and decodes the reply.
    ///
    /// The reply is checked against the message schema only, so error replies
    /// and replies from servers with another protocol version are returned
    /// rather than rejected.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the exchange fails or the reply is not a
    /// message.
    pub fn request(&self, msg: &Message) -> Result<Message, ClientError> {
        let reply = self.request_raw(&encode(msg)?)?;
        serde_json::from_slice(&reply)
            .map_err(|e| ClientError::Codec(CodecError::Malformed(e.to_string())))
    }
}

impl std::fmt::Debug for RequestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
