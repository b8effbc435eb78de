//! # Configuration Modules
//!
//! Layered configuration for the relay binaries: built-in defaults, an optional
//! JSON file, `.env` files, environment variables and the command line.

/// Relay server settings.
pub mod relay_config;
/// Subscriber settings.
pub mod subscriber_config;

pub use relay_config::{load_relay_config, LedgerSettings, RelayArgs, RelayConfig, SourceKind};
pub use subscriber_config::{SubscriberArgs, SubscriberConfig};

/// Loads `.env`, then the platform file (`.env.windows` or `.env.linux`).
/// Missing files are ignored; variables already set are not overwritten.
pub fn load_env_files() {
    let dotenv_os: &str = if cfg!(target_os = "windows") {
        ".env.windows"
    } else {
        ".env.linux"
    };

    dotenvy::dotenv().ok();
    dotenvy::from_filename(dotenv_os).ok();
}
