//! The server's side of the request/reply channel.
//!
//! [`ReplyTransport`] is the seam between the server loop and the network.
//! Production code uses [`ZmqReplyTransport`], a ZeroMQ `REP` socket; unit
//! tests use the generated `MockReplyTransport`.
//!
//! # How a REP socket behaves (for beginners)
//!
//! A `REP` socket enforces strict alternation: receive one request, send one
//! reply, receive the next request, and so on.  Sending twice in a row, or
//! receiving twice in a row, is an error.  That is why the server must answer
//! every request exactly once, including requests it cannot understand.
//!
//! # Ownership
//!
//! The socket and its ZeroMQ context are created by [`ZmqReplyTransport::bind`]
//! on the worker thread and dropped there when the loop ends.  Neither is ever
//! handed to another thread.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the request/reply transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The ZeroMQ context was terminated; the channel is gone for good.
    #[error("transport terminated")]
    Terminated,

    /// The socket could not be bound to `endpoint`.
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: zmq::Error,
    },

    /// The socket could not connect to `endpoint`.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: zmq::Error,
    },

    /// A receive or send did not complete within the configured timeout.
    #[error("transport timed out")]
    TimedOut,

    /// Any other socket error.
    #[error("transport error: {0}")]
    Io(#[source] zmq::Error),
}

impl From<zmq::Error> for TransportError {
    fn from(e: zmq::Error) -> Self {
        match e {
            zmq::Error::ETERM => TransportError::Terminated,
            zmq::Error::EAGAIN => TransportError::TimedOut,
            other => TransportError::Io(other),
        }
    }
}

/// The operations the server loop needs from its channel.
#[cfg_attr(test, mockall::automock)]
pub trait ReplyTransport {
    /// Waits up to `timeout` for a request; `Ok(true)` when one is ready.
    fn poll_request(&mut self, timeout: Duration) -> Result<bool, TransportError>;

    /// Receives the pending request frame.
    fn recv_request(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Sends the reply to the request last received.
    fn send_reply(&mut self, frame: &[u8]) -> Result<(), TransportError>;
}

/// A bound ZeroMQ `REP` socket.
pub struct ZmqReplyTransport {
    // Declared before the context so it is closed first on drop.
    socket: zmq::Socket,
    _context: zmq::Context,
    endpoint: String,
}

impl ZmqReplyTransport {
    /// Creates a context and a `REP` socket bound to `endpoint`.
    ///
    /// Linger is zero so teardown never waits on undelivered replies.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Bind`] if the endpoint is in use or invalid.
    pub fn bind(endpoint: &str) -> Result<Self, TransportError> {
        let context = zmq::Context::new();
        let socket = context.socket(zmq::REP)?;
        socket.set_linger(0)?;
        socket.bind(endpoint).map_err(|source| TransportError::Bind {
            endpoint: endpoint.to_string(),
            source,
        })?;
        Ok(Self {
            socket,
            _context: context,
            endpoint: endpoint.to_string(),
        })
    }

    /// Returns the endpoint this socket is bound to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl std::fmt::Debug for ZmqReplyTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZmqReplyTransport")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl ReplyTransport for ZmqReplyTransport {
    fn poll_request(&mut self, timeout: Duration) -> Result<bool, TransportError> {
        let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        let ready = self.socket.poll(zmq::POLLIN, timeout_ms)?;
        Ok(ready > 0)
    }

    fn recv_request(&mut self) -> Result<Vec<u8>, TransportError> {
        Ok(self.socket.recv_bytes(0)?)
    }

    fn send_reply(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        Ok(self.socket.send(frame, 0)?)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eterm_maps_to_terminated() {
        assert!(matches!(
            TransportError::from(zmq::Error::ETERM),
            TransportError::Terminated
        ));
    }

    #[test]
    fn test_eagain_maps_to_timed_out() {
        assert!(matches!(
            TransportError::from(zmq::Error::EAGAIN),
            TransportError::TimedOut
        ));
    }

    #[test]
    fn test_other_errors_map_to_io() {
        assert!(matches!(
            TransportError::from(zmq::Error::EFSM),
            TransportError::Io(zmq::Error::EFSM)
        ));
    }

    #[test]
    fn test_bind_rejects_malformed_endpoint() {
        let result = ZmqReplyTransport::bind("tcp://");
        assert!(matches!(result, Err(TransportError::Bind { .. })));
    }

    #[test]
    fn test_poll_on_idle_socket_times_out() {
        // Arrange: an in-process endpoint avoids touching the network
        let mut transport = ZmqReplyTransport::bind("inproc://poll-idle").expect("bind inproc");

        // Act
        let ready = transport.poll_request(Duration::from_millis(5)).expect("poll");

        // Assert
        assert!(!ready);
        assert_eq!(transport.endpoint(), "inproc://poll-idle");
    }
}
