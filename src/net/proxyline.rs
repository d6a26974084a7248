//! PROXY-protocol v1 prefix.
//!
//! When `frontend.proxyline` is set, every back-end connection starts
//! with a single human-readable line carrying the original client
//! address, so the back-end sees who really connected.

use std::net::SocketAddr;

/// Render the PROXY line for a connection. Mixed address families fall
/// back to the UNKNOWN form, which back-ends must tolerate.
pub fn encode(peer: SocketAddr, local: SocketAddr) -> String {
    match (peer, local) {
        (SocketAddr::V4(p), SocketAddr::V4(l)) => format!(
            "PROXY TCP4 {} {} {} {}\r\n",
            p.ip(),
            l.ip(),
            p.port(),
            l.port()
        ),
        (SocketAddr::V6(p), SocketAddr::V6(l)) => format!(
            "PROXY TCP6 {} {} {} {}\r\n",
            p.ip(),
            l.ip(),
            p.port(),
            l.port()
        ),
        _ => "PROXY UNKNOWN\r\n".to_string(),
    }
}
