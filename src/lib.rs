//! canopy: TLS-terminating reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌────────────────────────────────────────────────┐
//!                 │                    CANOPY                      │
//!   TLS clients   │  ┌──────────┐   ┌──────────┐   ┌────────────┐  │
//!  ───────────────┼─▶│   net    │──▶│   tls    │──▶│  back-end  │──┼──▶ plaintext
//!                 │  │ listener │   │ contexts │   │    pump    │  │    back-end
//!                 │  └──────────┘   └────┬─────┘   └────────────┘  │
//!                 │                      │                         │
//!                 │          ┌───────────┴───────────┐             │
//!                 │          ▼                       ▼             │
//!                 │   ┌─────────────┐         ┌─────────────┐      │
//!                 │   │ SNI helper  │         │ OCSP helper │      │
//!                 │   │ (pool.rs)   │         │ (pool.rs)   │      │
//!                 │   └─────────────┘         └─────────────┘      │
//!                 │                                                │
//!                 │  config · observability · lifecycle            │
//!                 └────────────────────────────────────────────────┘
//! ```
//!
//! The proxy terminates TLS on the front-end (SNI dispatch, protocol
//! negotiation, OCSP stapling) and pipes the cleartext stream to a
//! configured back-end, optionally prefixed with a PROXY-protocol line.
//! It is protocol-oblivious beyond TLS: no HTTP parsing, no session
//! cache, no persisted state.

pub mod cli;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod pool;
pub mod tls;

pub use config::Config;
pub use error::Error;
pub use tls::{Context, ContextSet};
