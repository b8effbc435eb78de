//! # Broadcast Hub
//!
//! The `BroadcastHub` is the fan-out point of the relay. It owns the registry of
//! live subscriber connections and turns each `publish` call into a single
//! serialized frame that is offered to every registered connection.
//!
//! ## Core Design Principles:
//!
//! 1.  **Serialize Once**: A publish encodes its envelope a single time and wraps
//!     the text in an `Arc<str>`. Each connection receives a new pointer to the
//!     *same* allocation.
//!
//! 2.  **Independent Delivery**: Every connection is offered the frame with a
//!     non-blocking `try_send`. A closed connection is evicted on the spot; a
//!     full transport buffer drops that one frame for that one connection. Neither
//!     case can stall or fail delivery to anybody else.
//!
//! 3.  **No Per-Subscriber Queueing Policy**: The only buffering is the small
//!     transport channel between the hub and the connection's socket writer.
//!     The hub does not retry, reorder or hold frames back.
//!
//! 4.  **Serialized Registry**: register, unregister and the publish iteration
//!     all take the same lock, so a connection is either fully in or fully out
//!     of any given publish.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::TrySendError};

use super::event::{encode_envelope, welcome_frame, Event, EventKind};

/// One serialized server -> client message.
pub type Frame = Arc<str>;

/// Unique (per hub) handle of a subscriber connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Raw numeric value, for logging.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// # Connection
///
/// The hub-side half of a subscriber channel. The other half, an
/// `mpsc::Receiver<Frame>`, is drained by the task that owns the socket.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    sender: mpsc::Sender<Frame>,
    opened_at: DateTime<Utc>,
}

impl Connection {
    /// Connection handle.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

/// Outcome of one `publish` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Sequence id stamped on the frame.
    pub sequence_id: u64,
    /// Connections that accepted the frame.
    pub delivered: usize,
    /// Connections whose transport buffer was full; frame lost, connection kept.
    pub dropped: usize,
    /// Connections found closed and removed from the registry.
    pub evicted: usize,
}

/// Internal registry entry.
struct ClientHandle {
    connection: Connection,
    /// Last successful delivery or inbound message. Informational only.
    last_activity: DateTime<Utc>,
}

/// Everything guarded by the hub lock. The sequence counter lives here so that
/// stamping a frame and offering it to the connections is one step.
#[derive(Default)]
struct Registry {
    clients: HashMap<ConnectionId, ClientHandle>,
    /// Sequence id of the last publish; 0 before the first one.
    last_sequence: u64,
}

impl Registry {
    fn insert(&mut self, connection: Connection) {
        let id = connection.id;
        let last_activity = connection.opened_at;
        self.clients.insert(
            id,
            ClientHandle {
                connection,
                last_activity,
            },
        );
        tracing::info!(connection = %id, active = self.clients.len(), "Subscriber registered");
    }
}

/// # Broadcast Hub
///
/// Registry of active subscriber connections and fan-out of novel events.
///
/// Sequence ids start at 1 and grow by one per publish. Frames reach every
/// connection in sequence order.
pub struct BroadcastHub {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
    buffer: usize,
}

impl BroadcastHub {
    /// Creates a hub whose connections buffer at most `buffer` frames between
    /// the hub and their socket writer.
    pub fn new(buffer: usize) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates a connection handle and its receiving half without registering it.
    pub fn open_connection(&self) -> (Connection, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let connection = Connection {
            id,
            sender: tx,
            opened_at: Utc::now(),
        };
        (connection, rx)
    }

    /// Opens and registers a connection in one step. The hub keeps the only
    /// sending half, so `unregister` or `close_all` closes the returned receiver.
    pub fn connect(&self) -> (ConnectionId, mpsc::Receiver<Frame>) {
        let (connection, rx) = self.open_connection();
        let id = connection.id;
        self.register(connection);
        (id, rx)
    }

    /// # Register
    ///
    /// Adds `connection` to the active set. Registering the same handle twice is
    /// a no-op; returns whether the connection was newly added.
    pub fn register(&self, connection: Connection) -> bool {
        let mut registry = self.registry();
        if registry.clients.contains_key(&connection.id) {
            return false;
        }
        registry.insert(connection);
        true
    }

    /// # Admit
    ///
    /// Registers a fresh connection and queues its welcome frame first, under the
    /// same lock as `publish`. The welcome carries the sequence id of the last
    /// publish, so the first broadcast frame the subscriber sees carries the
    /// welcome's id plus one, and any gap after that is a real loss.
    ///
    /// Returns `false` (and registers nothing) if the handle is already
    /// registered or its receiver is gone.
    pub fn admit(&self, connection: Connection) -> bool {
        let mut registry = self.registry();
        if registry.clients.contains_key(&connection.id) {
            return false;
        }
        let welcome: Frame = Arc::from(welcome_frame(registry.last_sequence));
        if connection.sender.try_send(welcome).is_err() {
            tracing::debug!(connection = %connection.id, "Subscriber left before welcome");
            return false;
        }
        registry.insert(connection);
        true
    }

    /// # Unregister
    ///
    /// Removes a connection. Safe on unknown or already-removed ids.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let mut registry = self.registry();
        let removed = registry.clients.remove(&id).is_some();
        if removed {
            tracing::info!(connection = %id, active = registry.clients.len(), "Subscriber unregistered");
        }
        removed
    }

    /// # Publish
    ///
    /// Serializes `{kind, events}` into one frame and offers it to every
    /// registered connection.
    ///
    /// ## Logic:
    /// 1.  Locks the registry, stamps the next sequence id and encodes the
    ///     envelope once. Holding the lock while stamping keeps concurrent
    ///     publishes in sequence order on every connection.
    /// 2.  Walks the registry with `retain`:
    ///     - accepted: counted as delivered, activity timestamp refreshed;
    ///     - buffer full: counted as dropped, connection kept;
    ///     - closed: counted as evicted and removed.
    /// 3.  Returns the per-publish `PublishReport`.
    pub fn publish(&self, kind: EventKind, events: &[Event]) -> PublishReport {
        let mut registry = self.registry();
        registry.last_sequence += 1;
        let sequence_id = registry.last_sequence;
        let frame: Frame = Arc::from(encode_envelope(
            kind,
            sequence_id,
            events.iter().map(|e| &e.payload),
        ));

        let mut report = PublishReport {
            sequence_id,
            ..PublishReport::default()
        };
        let now = Utc::now();

        registry.clients.retain(|id, client| {
            match client.connection.sender.try_send(Arc::clone(&frame)) {
                Ok(()) => {
                    client.last_activity = now;
                    report.delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(connection = %id, sequence_id, "Transport buffer full, frame dropped");
                    report.dropped += 1;
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::info!(connection = %id, "Send failed, connection closed. Evicting");
                    report.evicted += 1;
                    false
                }
            }
        });
        drop(registry);

        tracing::debug!(
            %kind,
            events = events.len(),
            sequence_id,
            delivered = report.delivered,
            dropped = report.dropped,
            evicted = report.evicted,
            "Published"
        );
        report
    }

    /// Offers a control frame (e.g. a pong) to a single connection. A closed
    /// connection is evicted, like in `publish`.
    pub fn send_to(&self, id: ConnectionId, frame: Frame) -> bool {
        let mut registry = self.registry();
        let Some(client) = registry.clients.get_mut(&id) else {
            return false;
        };
        match client.connection.sender.try_send(frame) {
            Ok(()) => {
                client.last_activity = Utc::now();
                true
            }
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Closed(_)) => {
                registry.clients.remove(&id);
                false
            }
        }
    }

    /// Records inbound activity on a connection.
    pub fn touch(&self, id: ConnectionId) {
        if let Some(client) = self.registry().clients.get_mut(&id) {
            client.last_activity = Utc::now();
        }
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.registry().clients.len()
    }

    /// True if `id` is currently registered.
    pub fn is_registered(&self, id: ConnectionId) -> bool {
        self.registry().clients.contains_key(&id)
    }

    /// Sequence id of the last publish, 0 if nothing was published yet.
    pub fn last_sequence_id(&self) -> u64 {
        self.registry().last_sequence
    }

    /// Drops every registered connection. Their socket writers observe the
    /// closed channel and close the sockets. Returns how many were dropped.
    pub fn close_all(&self) -> usize {
        let mut registry = self.registry();
        let n = registry.clients.len();
        for (id, client) in registry.clients.drain() {
            tracing::debug!(
                connection = %id,
                opened_at = %client.connection.opened_at,
                last_activity = %client.last_activity,
                "Closing subscriber"
            );
        }
        tracing::info!(closed = n, "All subscriber connections closed");
        n
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn tx(id: &str) -> Event {
        Event::new(id, EventKind::LedgerTx, json!({ "hash": id }))
    }

    #[test]
    fn register_is_idempotent_and_unregister_is_safe() {
        let hub = BroadcastHub::new(4);
        let (conn, _rx) = hub.open_connection();
        assert!(hub.register(conn.clone()));
        assert!(!hub.register(conn.clone()));
        assert_eq!(hub.connection_count(), 1);

        assert!(hub.unregister(conn.id()));
        assert!(!hub.unregister(conn.id()));
        assert_eq!(hub.connection_count(), 0);
    }

    #[test]
    fn every_connection_gets_the_same_frame() {
        let hub = BroadcastHub::new(4);
        let mut rxs: Vec<_> = (0..3).map(|_| hub.connect().1).collect();

        let report = hub.publish(EventKind::LedgerTx, &[tx("a"), tx("b")]);
        assert_eq!(report.delivered, 3);

        let frames: Vec<Frame> = rxs.iter_mut().map(|rx| rx.try_recv().unwrap()).collect();
        assert!(frames.iter().all(|f| Arc::ptr_eq(f, &frames[0])));
        let v: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(v["transactions"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn closed_connection_is_evicted_without_affecting_others() {
        let hub = BroadcastHub::new(4);
        let (_a, mut rx_a) = hub.connect();
        let (b, rx_b) = hub.connect();
        let (_c, mut rx_c) = hub.connect();
        drop(rx_b);

        let report = hub.publish(EventKind::LedgerTx, &[tx("x")]);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.evicted, 1);
        assert!(!hub.is_registered(b));
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_c.try_recv().is_ok());

        let report = hub.publish(EventKind::LedgerTx, &[tx("y")]);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.evicted, 0);
    }

    #[test]
    fn full_buffer_drops_the_frame_but_keeps_the_connection() {
        let hub = BroadcastHub::new(1);
        let (slow, mut rx) = hub.connect();

        assert_eq!(hub.publish(EventKind::Info, &[]).delivered, 1);
        let report = hub.publish(EventKind::Info, &[]);
        assert_eq!(report.dropped, 1);
        assert!(hub.is_registered(slow));

        let first: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(first["sequence_id"], 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn sequence_ids_increase_per_publish() {
        let hub = BroadcastHub::default();
        assert_eq!(hub.last_sequence_id(), 0);
        assert_eq!(hub.publish(EventKind::Info, &[]).sequence_id, 1);
        assert_eq!(hub.publish(EventKind::Info, &[]).sequence_id, 2);
        assert_eq!(hub.last_sequence_id(), 2);
    }

    #[test]
    fn concurrent_publishes_arrive_in_sequence_order() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 2_000;
        let hub = BroadcastHub::new(THREADS * PER_THREAD);
        let (_id, mut rx) = hub.connect();

        std::thread::scope(|scope| {
            for _ in 0..THREADS {
                scope.spawn(|| {
                    for _ in 0..PER_THREAD {
                        hub.publish(EventKind::Info, &[]);
                    }
                });
            }
        });

        let mut expected = 1;
        while let Ok(frame) = rx.try_recv() {
            let v: Value = serde_json::from_str(&frame).unwrap();
            assert_eq!(v["sequence_id"], expected);
            expected += 1;
        }
        assert_eq!(expected - 1, (THREADS * PER_THREAD) as u64);
    }

    #[test]
    fn admitted_connection_gets_welcome_then_the_next_publish() {
        let hub = BroadcastHub::new(4);
        hub.publish(EventKind::LedgerTx, &[tx("a")]);
        hub.publish(EventKind::LedgerTx, &[tx("b")]);

        let (conn, mut rx) = hub.open_connection();
        assert!(hub.admit(conn.clone()));
        assert!(!hub.admit(conn.clone()));
        assert!(hub.is_registered(conn.id()));
        hub.publish(EventKind::LedgerTx, &[tx("c")]);

        let welcome: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(welcome["type"], "info");
        assert_eq!(welcome["sequence_id"], 2);
        let next: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(next["sequence_id"], 3);
        assert_eq!(next["transactions"], json!([{ "hash": "c" }]));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn admit_refuses_a_connection_whose_receiver_is_gone() {
        let hub = BroadcastHub::new(4);
        let (conn, rx) = hub.open_connection();
        drop(rx);
        assert!(!hub.admit(conn));
        assert_eq!(hub.connection_count(), 0);
    }

    #[test]
    fn close_all_empties_registry_and_closes_receivers() {
        let hub = BroadcastHub::new(4);
        let (_a, mut rx) = hub.connect();
        let _ = hub.connect();
        assert_eq!(hub.close_all(), 2);
        assert_eq!(hub.connection_count(), 0);
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn send_to_targets_a_single_connection() {
        let hub = BroadcastHub::new(4);
        let (a, mut rx_a) = hub.connect();
        let (_b, mut rx_b) = hub.connect();
        assert!(hub.send_to(a, Arc::from("{\"type\":\"pong\"}")));
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }
}
