//! # Error Types
//!
//! Each failure class of the relay gets its own enum so that callers can
//! contain it where it originates: a fetch failure never reaches a subscriber,
//! a subscriber transport failure never reaches the poller.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single `EventSource::fetch_snapshot` call.
///
/// Always transient from the poller's point of view: it is logged and the cycle
/// counts as "zero novel events".
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed source response: {0}")]
    Parse(String),

    #[error("source reported an error: {0}")]
    Upstream(String),
}

impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        SourceError::Parse(e.to_string())
    }
}

/// Failure to open or keep a subscriber-side connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("connection error: {0}")]
    Io(String),
}

/// Terminal outcome of a reconnector.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconnectError {
    #[error("gave up after {attempts} reconnection attempts")]
    RetriesExhausted { attempts: u32 },
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Logging could not be initialised.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("cannot prepare log directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid log filter: {0}")]
    Filter(String),

    #[error("a global tracing subscriber is already installed: {0}")]
    AlreadyInstalled(String),
}
