//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (JSON)
//!     → loader.rs (structural checks, deserialize, defaults, validate)
//!     → Config (validated, immutable)
//!     → shared via Arc with every subsystem
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no hot reload
//! - Every scalar has a default so an empty object is a valid config
//! - Structural JSON checks run before typed deserialization so they can
//!   report precise error kinds

pub mod loader;
pub mod schema;

pub use schema::{BoundAddresses, Config, ContextConfig, FrontendConfig, HelperConfig, LogConfig};
