//! # Event Source Contract
//!
//! An `EventSource` produces a complete snapshot of candidate events per call.
//! Calls are independent: a source keeps no cursor between fetches, so novelty
//! is decided entirely downstream by the deduplicator.

use std::future::Future;

use crate::core::{Event, EventKind};
use crate::error::SourceError;

/// # Event Source
///
/// Abstraction over "fetch a snapshot of candidate events".
///
/// A fetch either returns the full snapshot or an error, never a partial list.
/// Implementations must be safe to call repeatedly; the poller guarantees that
/// at most one call is in flight per source.
pub trait EventSource: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Stream tag of every event this source produces.
    fn kind(&self) -> EventKind;

    /// Fetches one snapshot.
    fn fetch_snapshot(&self) -> impl Future<Output = Result<Vec<Event>, SourceError>> + Send;
}
