//! Outbound IPv4 detection.
//!
//! A server bound to `tcp://*:5555` listens on every interface, but a remote
//! client needs one concrete address.  We ask the OS which local address it
//! would use to reach the outside world: "connect" a UDP socket to a public
//! address (UDP connect sends nothing, it only picks a route) and read back
//! the socket's local address.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

use tracing::debug;

/// Address used only to select a route; no packet is sent to it.
const ROUTE_PROBE: (Ipv4Addr, u16) = (Ipv4Addr::new(8, 8, 8, 8), 80);

/// Returns the local IPv4 address of the default route, if there is one.
pub fn detect_outbound_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    if let Err(e) = socket.connect(ROUTE_PROBE) {
        debug!("no outbound route for IPv4 detection: {e}");
        return None;
    }
    match socket.local_addr().ok()? {
        SocketAddr::V4(addr) if !addr.ip().is_unspecified() => Some(*addr.ip()),
        _ => None,
    }
}

/// Like [`detect_outbound_ipv4`], falling back to the loopback address.
pub fn outbound_ipv4_or_loopback() -> Ipv4Addr {
    detect_outbound_ipv4().unwrap_or(Ipv4Addr::LOCALHOST)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
