//! # lib_relay
//!
//! Shared building blocks for the relay binaries: the event model, the novelty
//! filter, the broadcast hub, the polling ingestors, the subscriber-side
//! reconnector and the ambient plumbing (configuration, logging, HTTP retrieval).
//!
//! Every folder is gated behind a cargo feature of the same name; `full` turns
//! them all on.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Error types shared by every folder.
pub mod error;

/// Event model, SeenSet/deduplicator and the broadcast hub.
#[cfg(feature = "core")]
pub mod core;

/// Poller and concrete event sources.
#[cfg(feature = "ingestors")]
pub mod ingestors;

/// Subscriber reconnection state machine and connection factories.
#[cfg(feature = "reconnect")]
pub mod reconnect;

/// Layered runtime configuration.
#[cfg(feature = "configs")]
pub mod configs;

/// Tracing subscriber setup and log retention.
#[cfg(feature = "loggers")]
pub mod loggers;

/// Retrying HTTP client.
#[cfg(feature = "retrieve")]
pub mod retrieve;

pub use error::*;
