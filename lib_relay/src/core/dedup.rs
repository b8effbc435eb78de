//! # Novelty Filter
//!
//! The `SeenSet` remembers every event id observed during the life of the
//! process; the `Deduplicator` uses it to split a snapshot into novel and
//! already-seen candidates.
//!
//! By default the set only grows. A bounded set can be requested instead, in
//! which case the least recently *seen* id is forgotten first. A membership hit
//! refreshes recency, so an id that keeps appearing in consecutive snapshots is
//! never evicted while it is still on the source's page.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use super::event::Event;

/// Deduplicator shared between the poller and the ingestion endpoints.
pub type SharedDeduplicator = Arc<Mutex<Deduplicator>>;

/// # Seen Set
///
/// Set of previously observed event ids with optional LRU capacity.
#[derive(Debug, Default)]
pub struct SeenSet {
    /// id -> recency stamp.
    stamps: HashMap<String, u64>,
    /// recency stamp -> id, oldest first. Only maintained when bounded.
    order: BTreeMap<u64, String>,
    next_stamp: u64,
    capacity: Option<NonZeroUsize>,
}

impl SeenSet {
    /// A set that never forgets.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// A set that keeps at most `capacity` ids.
    pub fn bounded(capacity: NonZeroUsize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// `0` means unbounded.
    pub fn with_capacity(capacity: usize) -> Self {
        match NonZeroUsize::new(capacity) {
            Some(cap) => Self::bounded(cap),
            None => Self::unbounded(),
        }
    }

    /// Number of remembered ids.
    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    /// True when nothing has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    /// Pure membership test, does not touch recency.
    pub fn contains(&self, id: &str) -> bool {
        self.stamps.contains_key(id)
    }

    /// Records `id`. Returns `true` when it was not present before.
    pub fn observe(&mut self, id: &str) -> bool {
        let stamp = self.next_stamp;
        self.next_stamp += 1;

        if let Some(old) = self.stamps.get_mut(id) {
            if self.capacity.is_some() {
                self.order.remove(&*old);
                self.order.insert(stamp, id.to_string());
                *old = stamp;
            }
            return false;
        }

        self.stamps.insert(id.to_string(), stamp);
        if let Some(cap) = self.capacity {
            self.order.insert(stamp, id.to_string());
            while self.stamps.len() > cap.get() {
                match self.order.pop_first() {
                    Some((_, evicted)) => {
                        self.stamps.remove(&evicted);
                    }
                    None => break,
                }
            }
        }
        true
    }
}

/// # Deduplicator
///
/// Classifies candidates as novel or already seen, preserving input order.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: SeenSet,
    degraded: u64,
    skipped: u64,
}

impl Deduplicator {
    /// Deduplicator over the given set.
    pub fn new(seen: SeenSet) -> Self {
        Self {
            seen,
            degraded: 0,
            skipped: 0,
        }
    }

    /// Convenience for sharing between tasks.
    pub fn shared(seen: SeenSet) -> SharedDeduplicator {
        Arc::new(Mutex::new(Self::new(seen)))
    }

    /// Returns the novel subset of `candidates`, in input order, and records
    /// their ids. Candidates without a usable id are always novel.
    pub fn filter_novel(&mut self, candidates: Vec<Event>) -> Vec<Event> {
        let mut novel = Vec::with_capacity(candidates.len());
        for event in candidates {
            match event.dedup_key() {
                Some(id) => {
                    if self.seen.observe(id) {
                        novel.push(event);
                    } else {
                        self.skipped += 1;
                    }
                }
                None => {
                    self.degraded += 1;
                    novel.push(event);
                }
            }
        }
        novel
    }

    /// Candidates forwarded without an id so far.
    pub fn degraded(&self) -> u64 {
        self.degraded
    }

    /// Candidates skipped as already seen so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Read access to the underlying set.
    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }
}
