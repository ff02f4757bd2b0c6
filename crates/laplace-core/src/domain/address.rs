//! Bind address parsing.
//!
//! A server binds to `tcp://<host-or-*>:<port>`.  The host part may be a
//! concrete interface address (`127.0.0.1`, `192.168.1.20`) or a wildcard
//! (`*` or `0.0.0.0`) meaning "listen on every interface".
//!
//! The port must be concrete: the server reuses it to compute the address a
//! client should dial, and to reach itself during shutdown.

use std::net::Ipv4Addr;

use crate::validation::ConfigurationError;

/// The only transport scheme the server accepts.
pub const TCP_SCHEME: &str = "tcp://";

/// A validated `tcp://<host>:<port>` bind address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindAddress {
    raw: String,
    host: String,
    port: u16,
}

impl BindAddress {
    /// Parses and validates `address`.
    ///
    /// # Errors
    ///
    /// - [`ConfigurationError::InvalidScheme`] if the address does not start with `tcp://`.
    /// - [`ConfigurationError::MissingPort`] if there is no `:<port>` suffix.
    /// - [`ConfigurationError::EmptyHost`] if the host part is empty.
    /// - [`ConfigurationError::InvalidPort`] if the port is not a number in `1..=65535`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use laplace_core::BindAddress;
    ///
    /// let addr = BindAddress::parse("tcp://*:1234").unwrap();
    /// assert_eq!(addr.port(), 1234);
    /// assert!(addr.is_wildcard());
    /// ```
    pub fn parse(address: &str) -> Result<Self, ConfigurationError> {
        let rest = address
            .strip_prefix(TCP_SCHEME)
            .ok_or_else(|| ConfigurationError::InvalidScheme(address.to_string()))?;

        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| ConfigurationError::MissingPort(address.to_string()))?;

        if host.is_empty() {
            return Err(ConfigurationError::EmptyHost(address.to_string()));
        }

        let port: u16 = port
            .parse()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| ConfigurationError::InvalidPort {
                address: address.to_string(),
                port: port.to_string(),
            })?;

        Ok(Self {
            raw: address.to_string(),
            host: host.to_string(),
            port,
        })
    }

    /// The address exactly as configured.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The bind host (`*`, `0.0.0.0`, or a concrete interface).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The bind port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns `true` when the server listens on every interface.
    pub fn is_wildcard(&self) -> bool {
        self.host == "*" || self.host == "0.0.0.0"
    }

    /// The address remote clients should dial: the bind host replaced by `ip`.
    pub fn for_client(&self, ip: Ipv4Addr) -> String {
        format!("{TCP_SCHEME}{ip}:{}", self.port)
    }

    /// The address the server can always reach itself on.
    ///
    /// Wildcard binds are reached through loopback; concrete binds through the
    /// bound interface, which may be the only one listening.
    pub fn local_endpoint(&self) -> String {
        if self.is_wildcard() {
            self.for_client(Ipv4Addr::LOCALHOST)
        } else {
            format!("{TCP_SCHEME}{}:{}", self.host, self.port)
        }
    }
}

impl std::fmt::Display for BindAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}
