//! # Data Ingestors Module
//!
//! Everything that brings candidate events into the relay on a schedule.
//!
//! ## Purpose:
//! Different upstreams (an explorer REST API, a simulator) sit behind the one
//! `EventSource` contract, and a single `Poller` drives any of them. Novelty and
//! fan-out are not decided here; the poller hands every snapshot to
//! `core::forward_novel`.
//!
//! ## Contained Modules:
//! - **`source`**: The `EventSource` trait.
//! - **`poller`**: Fixed-cadence driver with the no-overlap guarantee.
//! - **`ledger`**: Token transfers from an Etherscan-compatible explorer.
//! - **`telemetry`**: Simulated microgrid readings and the grid report.

/// The snapshot contract every upstream implements.
pub mod source;
/// Fixed-interval, non-overlapping driver.
pub mod poller;
/// Block explorer token transfer source.
pub mod ledger;
/// Microgrid simulator and grid report.
pub mod telemetry;

// --- Public API Re-exports ---
pub use source::EventSource;
pub use poller::{PollOutcome, Poller, PollerStats};
pub use ledger::{LedgerExplorerConfig, LedgerExplorerSource};
pub use telemetry::{GridReport, HouseReading, TelemetrySimulator, Weather};
