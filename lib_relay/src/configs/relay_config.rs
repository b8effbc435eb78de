use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const DEFAULT_CONFIG_FILE: &str = "relay_server.conf";
const DEFAULT_SOURCE_URL: &str = "https://api-testnet.sonicscan.org/api";

/// Command line, environment and config file view of the server settings.
/// Every field is optional so that layers can be merged.
#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Real-time event relay server", version)]
#[serde(rename_all = "camelCase")]
pub struct RelayArgs {
    #[clap(long, env = "RELAY_PORT", help = "Port to listen on for subscriber and ingestion connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "RELAY_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "RELAY_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "RELAY_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "RELAY_LOG_KEEP", help = "Number of log files kept at startup.")]
    pub log_keep: Option<usize>,

    #[clap(long, env = "RELAY_POLL_INTERVAL_SECS", help = "Seconds between two polls of the event source.")]
    pub poll_interval_secs: Option<u64>,

    #[clap(long, env = "RELAY_FETCH_TIMEOUT_SECS", help = "Timeout of one fetch, in seconds. Defaults to the poll interval.")]
    pub fetch_timeout_secs: Option<u64>,

    #[clap(long, env = "RELAY_SOURCE", help = "Polled event source: ledger, telemetry or none.")]
    pub source: Option<String>,

    #[clap(long, env = "RELAY_SOURCE_URL", help = "Explorer API root for the ledger source.")]
    pub source_url: Option<String>,

    #[clap(long, env = "RELAY_SOURCE_API_KEY", help = "Explorer API key.")]
    pub source_api_key: Option<String>,

    #[clap(long, env = "RELAY_LEDGER_CONTRACT", help = "Token contract whose transfers are relayed.")]
    pub ledger_contract: Option<String>,

    #[clap(long, env = "RELAY_LEDGER_ADDRESS", help = "Address whose transfers are relayed.")]
    pub ledger_address: Option<String>,

    #[clap(long, env = "RELAY_TOKEN_DECIMALS", help = "Token decimals used when a transfer does not carry them.")]
    pub token_decimals: Option<u32>,

    #[clap(long, env = "RELAY_SEEN_CAPACITY", help = "Maximum remembered event ids (0 = unbounded).")]
    pub seen_capacity: Option<usize>,

    #[clap(long, env = "RELAY_CONNECTION_BUFFER", help = "Frames buffered per subscriber connection.")]
    pub connection_buffer: Option<usize>,
}

impl RelayArgs {
    /// Merges two layers; `other` overrides `self` where it has a value.
    pub fn merge(self, other: RelayArgs) -> RelayArgs {
        RelayArgs {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            log_keep: other.log_keep.or(self.log_keep),
            poll_interval_secs: other.poll_interval_secs.or(self.poll_interval_secs),
            fetch_timeout_secs: other.fetch_timeout_secs.or(self.fetch_timeout_secs),
            source: other.source.or(self.source),
            source_url: other.source_url.or(self.source_url),
            source_api_key: other.source_api_key.or(self.source_api_key),
            ledger_contract: other.ledger_contract.or(self.ledger_contract),
            ledger_address: other.ledger_address.or(self.ledger_address),
            token_decimals: other.token_decimals.or(self.token_decimals),
            seen_capacity: other.seen_capacity.or(self.seen_capacity),
            connection_buffer: other.connection_buffer.or(self.connection_buffer),
        }
    }

    /// Built-in defaults, the lowest layer.
    pub fn defaults() -> RelayArgs {
        RelayArgs {
            port: Some(3002),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            log_keep: Some(7),
            poll_interval_secs: Some(10),
            source: Some("telemetry".to_string()),
            source_url: Some(DEFAULT_SOURCE_URL.to_string()),
            token_decimals: Some(18),
            seen_capacity: Some(0),
            connection_buffer: Some(64),
            ..Default::default()
        }
    }
}

/// Which upstream the poller drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Ledger,
    Telemetry,
    /// HTTP ingestion only.
    None,
}

impl FromStr for SourceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ledger" => Ok(SourceKind::Ledger),
            "telemetry" => Ok(SourceKind::Telemetry),
            "none" | "" => Ok(SourceKind::None),
            other => Err(ConfigError::Invalid {
                key: "source",
                reason: format!("unknown source {other:?} (expected ledger, telemetry or none)"),
            }),
        }
    }
}

/// Ledger explorer settings, present when `source = ledger`.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSettings {
    pub url: String,
    pub api_key: Option<String>,
    pub contract: String,
    pub address: String,
    pub decimals: u32,
}

/// # Relay Config
///
/// Resolved, validated server settings. Handed to the core once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    pub port: u16,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub log_keep: usize,
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
    pub source: SourceKind,
    pub ledger: Option<LedgerSettings>,
    pub seen_capacity: usize,
    pub connection_buffer: usize,
}

impl RelayConfig {
    /// Validates a fully merged set of arguments.
    pub fn from_args(args: RelayArgs) -> Result<Self, ConfigError> {
        let args = RelayArgs::defaults().merge(args);

        let poll_secs = args.poll_interval_secs.unwrap_or(10);
        if poll_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "poll_interval_secs",
                reason: "must be at least 1".into(),
            });
        }
        let fetch_secs = args.fetch_timeout_secs.unwrap_or(poll_secs);
        if fetch_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "fetch_timeout_secs",
                reason: "must be at least 1".into(),
            });
        }
        let connection_buffer = args.connection_buffer.unwrap_or(64);
        if connection_buffer == 0 {
            return Err(ConfigError::Invalid {
                key: "connection_buffer",
                reason: "must be at least 1".into(),
            });
        }

        let source: SourceKind = args.source.as_deref().unwrap_or("telemetry").parse()?;
        let ledger = match source {
            SourceKind::Ledger => Some(LedgerSettings {
                url: args.source_url.unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
                api_key: args.source_api_key.filter(|k| !k.is_empty()),
                contract: required(args.ledger_contract, "ledger_contract")?,
                address: required(args.ledger_address, "ledger_address")?,
                decimals: args.token_decimals.unwrap_or(18),
            }),
            _ => None,
        };

        Ok(RelayConfig {
            port: args.port.unwrap_or(3002),
            log_dir: args.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: args.log_level.unwrap_or_else(|| "info".to_string()),
            log_keep: args.log_keep.unwrap_or(7),
            poll_interval: Duration::from_secs(poll_secs),
            fetch_timeout: Duration::from_secs(fetch_secs),
            source,
            ledger,
            seen_capacity: args.seen_capacity.unwrap_or(0),
            connection_buffer,
        })
    }
}

fn required(value: Option<String>, key: &'static str) -> Result<String, ConfigError> {
    value.filter(|v| !v.trim().is_empty()).ok_or(ConfigError::Invalid {
        key,
        reason: "required when source = ledger".into(),
    })
}

/// Reads a JSON config file layer.
pub fn read_config_file(path: &Path) -> Result<RelayArgs, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// # Load Relay Config
///
/// Layers, lowest first: defaults, JSON config file, then environment and
/// command line (`cli`, as parsed by clap).
///
/// A config file named explicitly must exist; the default one is optional.
pub fn load_relay_config(cli: RelayArgs) -> Result<RelayConfig, ConfigError> {
    let file_layer = match &cli.config_path {
        Some(path) => read_config_file(path)?,
        None => {
            let path = Path::new(DEFAULT_CONFIG_FILE);
            if path.exists() {
                read_config_file(path)?
            } else {
                tracing::debug!("Config file {} not found, using defaults and environment", path.display());
                RelayArgs::default()
            }
        }
    };

    RelayConfig::from_args(file_layer.merge(cli))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_resolve() {
        let config = RelayConfig::from_args(RelayArgs::default()).unwrap();
        assert_eq!(config.port, 3002);
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.fetch_timeout, config.poll_interval);
        assert_eq!(config.source, SourceKind::Telemetry);
        assert_eq!(config.seen_capacity, 0);
        assert_eq!(config.connection_buffer, 64);
        assert!(config.ledger.is_none());
    }

    #[test]
    fn later_layers_win() {
        let file = RelayArgs {
            port: Some(4000),
            poll_interval_secs: Some(30),
            ..Default::default()
        };
        let cli = RelayArgs::try_parse_from(["relay_server", "--port", "5000"]).unwrap();
        let config = RelayConfig::from_args(file.merge(cli)).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.poll_interval, Duration::from_secs(30));
    }

    #[test]
    fn ledger_source_needs_contract_and_address() {
        let args = RelayArgs {
            source: Some("ledger".into()),
            ledger_contract: Some("0xc".into()),
            ..Default::default()
        };
        let err = RelayConfig::from_args(args).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "ledger_address", .. }));

        let args = RelayArgs {
            source: Some("LEDGER".into()),
            ledger_contract: Some("0xc".into()),
            ledger_address: Some("0xa".into()),
            source_api_key: Some(String::new()),
            ..Default::default()
        };
        let ledger = RelayConfig::from_args(args).unwrap().ledger.unwrap();
        assert_eq!(ledger.url, DEFAULT_SOURCE_URL);
        assert_eq!(ledger.api_key, None);
        assert_eq!(ledger.decimals, 18);
    }

    #[test]
    fn rejects_bad_values() {
        let bad_source = RelayArgs {
            source: Some("scraper".into()),
            ..Default::default()
        };
        assert!(RelayConfig::from_args(bad_source).is_err());

        let zero_interval = RelayArgs {
            poll_interval_secs: Some(0),
            ..Default::default()
        };
        assert!(RelayConfig::from_args(zero_interval).is_err());
    }

    #[test]
    fn reads_camel_case_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"port": 7000, "seenCapacity": 500, "source": "none"}}"#).unwrap();

        let cli = RelayArgs {
            config_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let config = load_relay_config(cli).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.seen_capacity, 500);
        assert_eq!(config.source, SourceKind::None);
    }

    #[test]
    fn missing_explicit_config_file_is_an_error() {
        let cli = RelayArgs {
            config_path: Some(PathBuf::from("/definitely/not/here.conf")),
            ..Default::default()
        };
        assert!(matches!(load_relay_config(cli), Err(ConfigError::Io { .. })));
    }
}
