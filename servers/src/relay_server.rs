//! # Relay Server
//!
//! Observes an upstream event source, keeps only what is new and fans it out to
//! every connected subscriber over websockets.
//!
//! ## Functionality:
//! - **Polling**: The configured `EventSource` (ledger explorer or telemetry
//!   simulator) is polled on a fixed cadence, never with overlapping fetches.
//! - **HTTP Ingestion**: `/api/simulation`, `/webhook` and `/api/thoughts` push
//!   events through the same novelty filter.
//! - **Fan-out**: `/ws` subscribers receive every novel batch as one frame.
//! - **Graceful Shutdown**: `tokio-graceful` catches SIGINT/SIGTERM; the poller
//!   and any in-flight fetch are cancelled, every subscriber connection is
//!   closed and the HTTP server drains within 10 seconds.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tokio_graceful::Shutdown;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use lib_relay::configs::{RelayArgs, RelayConfig, SourceKind, load_env_files, load_relay_config};
use lib_relay::ingestors::{
    EventSource, LedgerExplorerConfig, LedgerExplorerSource, Poller, TelemetrySimulator,
};
use lib_relay::loggers::init_tracing;
use servers::relay_logic::downstream;
use servers::relay_logic::state::AppState;

/// Transfers requested from the explorer per poll.
const LEDGER_PAGE_SIZE: u32 = 25;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Phase 1: Configuration and Logging ---
    load_env_files();
    let config = load_relay_config(RelayArgs::parse())?;
    let _guard = init_tracing(&config.log_dir, &config.log_level, "relay_server", config.log_keep)?;
    info!(
        port = config.port,
        source = ?config.source,
        poll_interval = ?config.poll_interval,
        fetch_timeout = ?config.fetch_timeout,
        seen_capacity = config.seen_capacity,
        connection_buffer = config.connection_buffer,
        "Configuration loaded"
    );

    // --- Phase 2: Shared State ---
    let state = AppState::with_capacity(config.connection_buffer, config.seen_capacity);
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;

    let shutdown: Shutdown = Shutdown::default();
    let cancel = CancellationToken::new();

    // --- Phase 3: Poller ---
    match config.source {
        SourceKind::Telemetry => {
            spawn_poller(&shutdown, TelemetrySimulator::new(), &config, &state, cancel.clone());
        }
        SourceKind::Ledger => {
            let Some(ledger) = config.ledger.clone() else {
                anyhow::bail!("ledger source selected without ledger settings");
            };
            let source = LedgerExplorerSource::new(LedgerExplorerConfig {
                url: ledger.url,
                api_key: ledger.api_key,
                contract: ledger.contract,
                address: ledger.address,
                decimals: ledger.decimals,
                page_size: LEDGER_PAGE_SIZE,
                timeout: config.fetch_timeout,
            })?;
            spawn_poller(&shutdown, source, &config, &state, cancel.clone());
        }
        SourceKind::None => info!("No polled source configured, HTTP ingestion only"),
    }

    // --- Phase 4: HTTP Server ---
    let hub = Arc::clone(&state.hub);
    shutdown.spawn_task_fn(move |guard| async move {
        let stop_guard = guard.clone();
        let stop = async move { stop_guard.cancelled().await };
        if let Err(e) = downstream::serve(listener, state, stop).await {
            error!("HTTP server failed: {e:#}");
        }
        drop(guard);
    });

    // --- Phase 5: Shutdown Fan-in ---
    shutdown.spawn_task_fn(move |guard| async move {
        guard.cancelled().await;
        info!("Signal received: initiate graceful shutdown");
        cancel.cancel();
        hub.close_all();
    });

    match shutdown.shutdown_with_limit(Duration::from_secs(10)).await {
        Ok(elapsed) => {
            info!(
                "shutdown: gracefully {}s after shutdown signal received",
                elapsed.as_secs_f64()
            );
        }
        Err(e) => {
            info!("shutdown: forcefully due to timeout: {}", e);
        }
    }

    info!("Bye!");
    Ok(())
}

fn spawn_poller<S: EventSource>(
    shutdown: &Shutdown,
    source: S,
    config: &RelayConfig,
    state: &AppState,
    cancel: CancellationToken,
) {
    let poller = Poller::new(
        Arc::new(source),
        Arc::clone(&state.dedup),
        Arc::clone(&state.hub),
        config.poll_interval,
    )
    .with_fetch_timeout(config.fetch_timeout);

    shutdown.spawn_task_fn(move |guard| async move {
        let _guard = guard;
        poller.run(cancel).await;
    });
}
