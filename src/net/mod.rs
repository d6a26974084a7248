//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → client.rs (hello peek, TLS handshake, back-end pump)
//!     → proxyline.rs (optional PROXY-protocol prefix)
//! ```

pub mod addr;
pub mod client;
pub mod listener;
pub mod proxyline;
pub mod server;

pub use listener::{ConnectionPermit, Listener, ListenerError};
pub use server::ProxyServer;
