//! # Poller
//!
//! Drives an `EventSource` on a fixed period and forwards novel events to the
//! hub.
//!
//! ## Key Design Principles:
//! - **Fixed Cadence**: The timer fires every `interval` regardless of how the
//!   previous cycle went. There is no backoff on repeated fetch failures.
//! - **No Overlap**: A tick that finds the previous cycle still in flight is
//!   skipped entirely. Nothing is queued; the next attempt is the next tick.
//! - **Bounded Fetch**: Each fetch runs under `fetch_timeout`; a timeout is a
//!   transient failure like any other.
//! - **Contained Failures**: A failed cycle is logged and counted as "zero novel
//!   events". It never stops the timer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::source::EventSource;
use crate::core::{forward_novel, BroadcastHub, PublishReport, SharedDeduplicator};
use crate::error::SourceError;

/// Counters of a poller's life, for logging and tests.
#[derive(Debug, Default)]
pub struct PollerStats {
    cycles: AtomicU64,
    skipped_ticks: AtomicU64,
    failures: AtomicU64,
    published: AtomicU64,
}

impl PollerStats {
    /// Fetch cycles started.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Ticks skipped because a cycle was still in flight.
    pub fn skipped_ticks(&self) -> u64 {
        self.skipped_ticks.load(Ordering::Relaxed)
    }

    /// Cycles that ended in a fetch error or timeout.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Cycles that published a frame.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

/// Result of a single poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Another cycle was in flight; nothing was fetched.
    Skipped,
    /// The fetch failed or timed out.
    Failed,
    /// Cancelled while the fetch was in flight.
    Cancelled,
    /// The snapshot held nothing new.
    Quiet,
    /// Novel events were published.
    Published(PublishReport),
}

/// Holds the busy flag for the duration of one cycle.
struct BusyGuard {
    flag: Arc<AtomicBool>,
}

impl BusyGuard {
    fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                flag: Arc::clone(flag),
            })
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// # Poller
///
/// Cheap to clone; clones share the busy flag and the stats.
pub struct Poller<S: EventSource> {
    source: Arc<S>,
    dedup: SharedDeduplicator,
    hub: Arc<BroadcastHub>,
    interval: Duration,
    fetch_timeout: Duration,
    busy: Arc<AtomicBool>,
    stats: Arc<PollerStats>,
}

impl<S: EventSource> Clone for Poller<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            dedup: Arc::clone(&self.dedup),
            hub: Arc::clone(&self.hub),
            interval: self.interval,
            fetch_timeout: self.fetch_timeout,
            busy: Arc::clone(&self.busy),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<S: EventSource> Poller<S> {
    /// Creates a poller. `fetch_timeout` defaults to `interval`.
    pub fn new(
        source: Arc<S>,
        dedup: SharedDeduplicator,
        hub: Arc<BroadcastHub>,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            dedup,
            hub,
            interval,
            fetch_timeout: interval,
            busy: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(PollerStats::default()),
        }
    }

    /// Overrides the per-fetch timeout.
    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// Shared counters.
    pub fn stats(&self) -> Arc<PollerStats> {
        Arc::clone(&self.stats)
    }

    /// True while a cycle is in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// # Main Execution Loop
    ///
    /// Ticks every `interval` until `cancel` fires.
    ///
    /// ## Workflow:
    /// 1.  **Tick**: The first tick fires immediately; late ticks are skipped,
    ///     not bunched up.
    /// 2.  **Overlap Check**: If a cycle is still in flight the tick is counted
    ///     as skipped and dropped.
    /// 3.  **Cycle**: Otherwise the cycle runs on its own task, so a slow fetch
    ///     never delays the timer. It gets a child token of `cancel`, which aborts
    ///     the fetch on shutdown.
    /// 4.  **Drain**: Once cancelled, `run` returns only after the in-flight
    ///     cycle has finished, so a shutdown guard held around `run` covers it.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            source = self.source.name(),
            interval = ?self.interval,
            fetch_timeout = ?self.fetch_timeout,
            "Poller started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // At most one cycle is in flight, so the latest handle is the only one
        // that can still be running.
        let mut in_flight: Option<JoinHandle<PollOutcome>> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    // --- Phase 1: Overlap Check ---
                    let Some(guard) = BusyGuard::try_acquire(&self.busy) else {
                        self.stats.skipped_ticks.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(source = self.source.name(), "Previous cycle still in flight, tick skipped");
                        continue;
                    };

                    // --- Phase 2: Detached Cycle ---
                    let this = self.clone();
                    let child = cancel.child_token();
                    in_flight = Some(tokio::spawn(async move {
                        let _guard = guard;
                        this.cycle(&child).await
                    }));
                }
            }
        }

        // --- Phase 3: Drain ---
        // The cancelled cycle has seen its child token; wait for it to unwind.
        if let Some(cycle) = in_flight.take() {
            if let Err(e) = cycle.await {
                tracing::warn!(source = self.source.name(), error = %e, "Poll cycle task failed");
            }
        }

        tracing::info!(source = self.source.name(), "Poller stopped");
    }

    /// Runs one cycle on the calling task, honouring the busy flag.
    pub async fn poll_once(&self) -> PollOutcome {
        match BusyGuard::try_acquire(&self.busy) {
            Some(_guard) => self.cycle(&CancellationToken::new()).await,
            None => {
                self.stats.skipped_ticks.fetch_add(1, Ordering::Relaxed);
                PollOutcome::Skipped
            }
        }
    }

    async fn cycle(&self, cancel: &CancellationToken) -> PollOutcome {
        self.stats.cycles.fetch_add(1, Ordering::Relaxed);
        let source = self.source.name();

        // --- Phase 1: Bounded Fetch ---
        let fetched = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(source, "In-flight fetch cancelled");
                return PollOutcome::Cancelled;
            }
            res = tokio::time::timeout(self.fetch_timeout, self.source.fetch_snapshot()) => {
                res.unwrap_or(Err(SourceError::Timeout(self.fetch_timeout)))
            }
        };

        let candidates = match fetched {
            Ok(candidates) => candidates,
            Err(e) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(source, error = %e, "Fetch failed, treating as empty snapshot");
                return PollOutcome::Failed;
            }
        };

        // --- Phase 2: Novelty Filter and Publish ---
        match forward_novel(&self.dedup, &self.hub, self.source.kind(), candidates) {
            Some(report) => {
                self.stats.published.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    source,
                    sequence_id = report.sequence_id,
                    delivered = report.delivered,
                    "New events published"
                );
                PollOutcome::Published(report)
            }
            None => {
                tracing::debug!(source, "No new events");
                PollOutcome::Quiet
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Deduplicator, Event, EventKind, SeenSet};
    use serde_json::json;
    use std::sync::Mutex;

    /// Fake source with a controllable delay that tracks concurrency.
    struct SlowSource {
        delay: Duration,
        snapshots: Mutex<Vec<Vec<&'static str>>>,
        in_flight: AtomicU64,
        max_in_flight: AtomicU64,
        calls: AtomicU64,
        completed: AtomicU64,
        fail: bool,
    }

    impl SlowSource {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                snapshots: Mutex::new(Vec::new()),
                in_flight: AtomicU64::new(0),
                max_in_flight: AtomicU64::new(0),
                calls: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                fail: false,
            }
        }

        fn with_snapshots(self, snapshots: Vec<Vec<&'static str>>) -> Self {
            *self.snapshots.lock().unwrap() = snapshots.into_iter().rev().collect();
            self
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }
    }

    impl EventSource for SlowSource {
        fn name(&self) -> &str {
            "slow"
        }

        fn kind(&self) -> EventKind {
            EventKind::LedgerTx
        }

        async fn fetch_snapshot(&self) -> Result<Vec<Event>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.completed.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SourceError::Transport("connection refused".into()));
            }
            let ids = self.snapshots.lock().unwrap().pop().unwrap_or_default();
            Ok(ids
                .into_iter()
                .map(|id| Event::new(id, EventKind::LedgerTx, json!({ "hash": id })))
                .collect())
        }
    }

    fn poller(source: Arc<SlowSource>, interval: Duration) -> (Poller<SlowSource>, Arc<BroadcastHub>) {
        let hub = Arc::new(BroadcastHub::new(16));
        let dedup = Deduplicator::shared(SeenSet::unbounded());
        (Poller::new(source, dedup, Arc::clone(&hub), interval), hub)
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_never_overlaps() {
        let source = Arc::new(SlowSource::new(Duration::from_secs(25)));
        let (poller, _hub) = poller(Arc::clone(&source), Duration::from_secs(10));
        let poller = poller.with_fetch_timeout(Duration::from_secs(60));
        let stats = poller.stats();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poller.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(95)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
        assert!(source.calls.load(Ordering::SeqCst) >= 3);
        assert!(stats.skipped_ticks() >= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_once_is_skipped_while_busy() {
        let source = Arc::new(SlowSource::new(Duration::from_secs(5)));
        let (poller, _hub) = poller(Arc::clone(&source), Duration::from_secs(10));

        let background = poller.clone();
        let first = tokio::spawn(async move { background.poll_once().await });
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(poller.is_busy());
        assert_eq!(poller.poll_once().await, PollOutcome::Skipped);
        assert_eq!(first.await.unwrap(), PollOutcome::Quiet);
        assert!(!poller.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_a_transient_failure() {
        let source = Arc::new(SlowSource::new(Duration::from_secs(3600)));
        let (poller, _hub) = poller(Arc::clone(&source), Duration::from_secs(10));
        let poller = poller.with_fetch_timeout(Duration::from_secs(5));

        assert_eq!(poller.poll_once().await, PollOutcome::Failed);
        assert_eq!(poller.stats().failures(), 1);
        assert!(!poller.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn failures_do_not_stop_the_timer() {
        let source = Arc::new(SlowSource::new(Duration::from_millis(10)).failing());
        let (poller, _hub) = poller(Arc::clone(&source), Duration::from_secs(10));
        let stats = poller.stats();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poller.run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(45)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(stats.cycles(), 5);
        assert_eq!(stats.failures(), 5);
        assert_eq!(stats.published(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_aborts_in_flight_fetch() {
        let source = Arc::new(SlowSource::new(Duration::from_secs(1000)));
        let (poller, _hub) = poller(Arc::clone(&source), Duration::from_secs(10));
        let watched = poller.clone();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poller.run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(watched.is_busy());

        cancel.cancel();
        handle.await.unwrap();
        // run has returned, so the cycle has already unwound
        assert!(!watched.is_busy());
        assert_eq!(source.in_flight.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(2000)).await;
        assert_eq!(source.completed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn only_new_ids_are_published() {
        let source = Arc::new(
            SlowSource::new(Duration::from_millis(1)).with_snapshots(vec![
                vec!["a", "b"],
                vec!["a", "b"],
                vec!["a", "b", "c"],
            ]),
        );
        let (poller, hub) = poller(Arc::clone(&source), Duration::from_secs(10));
        let (_conn, mut rx) = hub.connect();

        assert!(matches!(poller.poll_once().await, PollOutcome::Published(_)));
        assert_eq!(poller.poll_once().await, PollOutcome::Quiet);
        assert!(matches!(poller.poll_once().await, PollOutcome::Published(_)));

        let _first = rx.try_recv().unwrap();
        let third: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(third["transactions"], json!([{ "hash": "c" }]));
        assert!(rx.try_recv().is_err());
    }
}
