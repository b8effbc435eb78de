use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::error::ConfigError;

/// Subscriber settings from the command line and environment.
#[derive(Parser, Debug, Clone, Default, PartialEq)]
#[clap(about = "Headless relay subscriber", version)]
pub struct SubscriberArgs {
    #[clap(long, env = "RELAY_URL", help = "Websocket URL of the relay.")]
    pub url: Option<String>,

    #[clap(long, env = "RELAY_MAX_RECONNECT_ATTEMPTS", help = "Consecutive reconnection attempts before giving up.")]
    pub max_reconnect_attempts: Option<u32>,

    #[clap(long, env = "RELAY_RECONNECT_BASE_DELAY_MS", help = "Linear backoff base delay in milliseconds.")]
    pub reconnect_base_delay_ms: Option<u64>,

    #[clap(long, env = "RELAY_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "RELAY_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,
}

/// Resolved subscriber settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriberConfig {
    pub url: String,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub log_dir: PathBuf,
    pub log_level: String,
}

impl SubscriberConfig {
    pub fn from_args(args: SubscriberArgs) -> Result<Self, ConfigError> {
        let url = args
            .url
            .unwrap_or_else(|| "ws://127.0.0.1:3002/ws".to_string());
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ConfigError::Invalid {
                key: "url",
                reason: format!("{url} is not a ws:// or wss:// URL"),
            });
        }

        Ok(SubscriberConfig {
            url,
            max_attempts: args.max_reconnect_attempts.unwrap_or(5),
            base_delay: Duration::from_millis(args.reconnect_base_delay_ms.unwrap_or(2000)),
            log_dir: args.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: args.log_level.unwrap_or_else(|| "info".to_string()),
        })
    }
}
