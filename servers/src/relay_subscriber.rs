//! # Relay Subscriber
//!
//! Headless consumer of a relay: keeps one websocket connection alive through
//! the `Reconnector` and prints every event it receives.
//!
//! Exits with status 0 after Ctrl-C and non-zero once the retry budget is
//! exhausted, so a supervisor can tell "stopped" from "gave up".

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use lib_relay::configs::{SubscriberArgs, SubscriberConfig, load_env_files};
use lib_relay::core::WireEnvelope;
use lib_relay::loggers::init_tracing;
use lib_relay::reconnect::{ReconnectPolicy, Reconnector, WsConnectionFactory};

#[tokio::main]
async fn main() -> Result<()> {
    load_env_files();
    let config = SubscriberConfig::from_args(SubscriberArgs::parse())?;
    let _guard = init_tracing(&config.log_dir, &config.log_level, "relay_subscriber", 7)?;

    let policy = ReconnectPolicy::new(config.max_attempts, config.base_delay);
    info!(url = %config.url, max_attempts = policy.max_attempts, base_delay = ?policy.base_delay, "Subscriber starting");
    let reconnector = Reconnector::new(WsConnectionFactory::new(config.url.as_str()), policy);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Signal received: closing subscriber");
            on_signal.cancel();
        }
    });

    let mut tracker = SequenceTracker::default();
    match reconnector.run(move |text| handle_frame(&text, &mut tracker), cancel).await {
        Ok(()) => {
            info!("Bye!");
            Ok(())
        }
        Err(e) => {
            error!("Disconnected: {e}");
            Err(e.into())
        }
    }
}

/// Last seen publish counter, to report frames lost in between.
#[derive(Debug, Default)]
struct SequenceTracker {
    last: Option<u64>,
}

impl SequenceTracker {
    /// Returns how many frames were skipped before `sequence_id`.
    fn observe(&mut self, sequence_id: u64) -> u64 {
        let missed = match self.last {
            Some(prev) if sequence_id > prev + 1 => sequence_id - prev - 1,
            _ => 0,
        };
        self.last = Some(sequence_id);
        missed
    }
}

/// Unparseable frames are logged and dropped; the connection stays up.
fn handle_frame(text: &str, tracker: &mut SequenceTracker) {
    let envelope = match WireEnvelope::parse(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "Discarding unparseable frame");
            return;
        }
    };

    if let Some(sequence_id) = envelope.sequence_id {
        let missed = tracker.observe(sequence_id);
        if missed > 0 {
            warn!(missed, sequence_id, "Frames missed");
        }
    }

    match envelope.event_kind() {
        Some(kind) => {
            debug!(%kind, items = envelope.items.len(), sequence_id = ?envelope.sequence_id, "Frame received");
            for item in &envelope.items {
                println!("[{kind}] {item}");
            }
        }
        None => debug!(kind = %envelope.kind, "Control frame"),
    }
}
