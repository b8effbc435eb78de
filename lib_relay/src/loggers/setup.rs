use std::fs;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::LoggingError;

/// # Init Tracing
///
/// Installs the global `tracing` subscriber:
/// - verbosity from `RUST_LOG`, falling back to `log_level`;
/// - a human-readable console layer with ANSI colors;
/// - a JSON layer written to `<log_dir>/<app_name>.<date>`, rolled daily.
///
/// Log files beyond the newest `keep` are pruned first.
///
/// The returned `WorkerGuard` flushes the file writer on drop and must be held
/// for the life of the process.
pub fn init_tracing(
    log_dir: &Path,
    log_level: &str,
    app_name: &str,
    keep: usize,
) -> Result<WorkerGuard, LoggingError> {
    fs::create_dir_all(log_dir)?;
    cleanup_old_logs(log_dir, app_name, keep)?;

    let file_appender = rolling::daily(log_dir, app_name);
    let (non_blocking_appender, guard) = non_blocking(file_appender);

    let console_layer = fmt::layer().with_target(true).with_ansi(true);

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking_appender)
        .json();

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| LoggingError::Filter(e.to_string()))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInstalled(e.to_string()))?;

    tracing::info!(level = log_level, dir = %log_dir.display(), "Logging initialized");
    Ok(guard)
}

/// Deletes all but the newest `keep` log files of `app_name` in `log_dir`.
///
/// Rolled files are named `<app_name>.<YYYY-MM-DD>`, so name order is age order.
/// Returns the removed paths.
pub fn cleanup_old_logs(log_dir: &Path, app_name: &str, keep: usize) -> Result<Vec<PathBuf>, LoggingError> {
    let prefix = format!("{app_name}.");
    let mut log_files: Vec<PathBuf> = fs::read_dir(log_dir)?
        .filter_map(|res| res.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix))
        })
        .collect();

    // Newest first.
    log_files.sort_by(|a, b| b.file_name().cmp(&a.file_name()));

    let mut removed = Vec::new();
    for old_file in log_files.into_iter().skip(keep) {
        match fs::remove_file(&old_file) {
            Ok(()) => removed.push(old_file),
            Err(e) => eprintln!("Failed to delete old log file {}: {}", old_file.display(), e),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_newest_files_of_the_app() {
        let dir = tempfile::tempdir().unwrap();
        for day in 1..=5 {
            fs::write(dir.path().join(format!("relay_server.2026-01-0{day}")), "{}").unwrap();
        }
        fs::write(dir.path().join("relay_subscriber.2026-01-01"), "{}").unwrap();

        let removed = cleanup_old_logs(dir.path(), "relay_server", 2).unwrap();
        assert_eq!(removed.len(), 3);

        let mut left: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        left.sort();
        assert_eq!(
            left,
            vec![
                "relay_server.2026-01-04",
                "relay_server.2026-01-05",
                "relay_subscriber.2026-01-01",
            ]
        );
    }

    #[test]
    fn empty_directory_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        assert!(cleanup_old_logs(dir.path(), "relay_server", 0).unwrap().is_empty());
    }
}
