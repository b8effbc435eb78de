//! # Subscriber Reconnection
//!
//! The subscriber-side half of the relay, written once and parameterized by a
//! retry policy and a connection factory.
//!
//! ## Contained Modules:
//! - **`state`**: `ReconnectPolicy`, the pure `ReconnectState` machine and the
//!   `ReconnectEvent` transitions it exposes.
//! - **`factory`**: The `ConnectionFactory` trait and the websocket
//!   implementation.
//! - **`reconnector`**: The async driver tying both together.

/// Backoff bookkeeping.
pub mod state;
/// Connection factories.
pub mod factory;
/// Async reconnect loop.
pub mod reconnector;

// --- Public API Re-exports ---
pub use state::{Decision, ReconnectEvent, ReconnectPolicy, ReconnectState};
pub use factory::{ConnectionFactory, InboundStream, WsConnectionFactory};
pub use reconnector::Reconnector;
