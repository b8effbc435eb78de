//! # Core Relay Module
//!
//! This module forms the heart of the relay. It aggregates the components that
//! decide what is new and who gets it.
//!
//! ## Core Components:
//!
//! - **`event`**: The `Event` record, its `EventKind` tag and the JSON envelopes
//!   exchanged with subscribers.
//!
//! - **`dedup`**: The `SeenSet` of previously observed event ids and the
//!   `Deduplicator` that classifies candidates as novel or already seen.
//!
//! - **`hub`**: The `BroadcastHub`, registry of live subscriber connections and
//!   fan-out point for novel events.
//!
//! - **`pipeline`**: `forward_novel`, the single path from a batch of candidate
//!   events to the hub, shared by the poller and the HTTP ingestion endpoints.
//!
//! Every instance is constructor-injected; nothing here lives in a global, so
//! several independent relays can coexist in one process (tests rely on this).

/// Event record, kind tag and wire envelopes.
pub mod event;
/// Novelty filter over event ids.
pub mod dedup;
/// Subscriber registry and fan-out.
pub mod hub;
/// Candidate batch -> novelty filter -> hub.
pub mod pipeline;

// --- Public API Re-exports ---
pub use event::{ClientIntent, Event, EventKind, WireEnvelope};
pub use dedup::{Deduplicator, SeenSet, SharedDeduplicator};
pub use hub::{BroadcastHub, Connection, ConnectionId, Frame, PublishReport};
pub use pipeline::forward_novel;
