//! # Loggers
//!
//! Process-wide `tracing` setup shared by the relay binaries: console output for
//! operators, JSON files for later analysis.

/// Subscriber installation and log retention.
pub mod setup;

pub use setup::{cleanup_old_logs, init_tracing};
