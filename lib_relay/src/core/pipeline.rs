use std::sync::PoisonError;

use super::dedup::SharedDeduplicator;
use super::event::{Event, EventKind};
use super::hub::{BroadcastHub, PublishReport};

/// Filters `candidates` through the deduplicator and publishes the novel
/// remainder as one frame. Returns `None` when nothing was novel.
///
/// The deduplicator lock is released before the hub is touched.
pub fn forward_novel(
    dedup: &SharedDeduplicator,
    hub: &BroadcastHub,
    kind: EventKind,
    candidates: Vec<Event>,
) -> Option<PublishReport> {
    let total = candidates.len();
    let (novel, skipped_total, degraded_total) = {
        let mut guard = dedup.lock().unwrap_or_else(PoisonError::into_inner);
        let novel = guard.filter_novel(candidates);
        (novel, guard.skipped(), guard.degraded())
    };

    if novel.is_empty() {
        tracing::trace!(%kind, candidates = total, skipped_total, "No novel events");
        return None;
    }

    tracing::debug!(
        %kind,
        candidates = total,
        novel = novel.len(),
        skipped_total,
        degraded_total,
        "Forwarding novel events"
    );
    Some(hub.publish(kind, &novel))
}
