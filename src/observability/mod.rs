//! Observability subsystem.
//!
//! Structured logging only: every subsystem emits `tracing` events with
//! fields, and `logging.rs` routes them to stdout and/or syslog per the
//! config. The proxy is protocol-oblivious and keeps no per-request
//! state, so there is no metrics endpoint to serve.

pub mod logging;
