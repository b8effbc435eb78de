use std::sync::Arc;

use lib_relay::core::{BroadcastHub, Deduplicator, SeenSet, SharedDeduplicator};

/// Shared state of every route: the one hub and the one novelty filter of this
/// relay instance.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<BroadcastHub>,
    pub dedup: SharedDeduplicator,
}

impl AppState {
    pub fn new(hub: Arc<BroadcastHub>, dedup: SharedDeduplicator) -> Self {
        Self { hub, dedup }
    }

    /// Fresh hub and deduplicator.
    pub fn with_capacity(connection_buffer: usize, seen_capacity: usize) -> Self {
        Self {
            hub: Arc::new(BroadcastHub::new(connection_buffer)),
            dedup: Deduplicator::shared(SeenSet::with_capacity(seen_capacity)),
        }
    }
}
