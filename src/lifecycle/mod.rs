//! Process lifecycle.
//!
//! Worker spawning and supervision live outside this process; the only
//! lifecycle concern here is draining the accept loop cleanly.

pub mod shutdown;

pub use shutdown::Shutdown;
