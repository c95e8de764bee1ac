//! Logging setup
//!
//! Console output plus an optional daily-rolling log file. `RUST_LOG`
//! overrides the configured level.

use crate::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Keeps the non-blocking file writer flushing for the life of the process
static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Directory for rolling log files; console only when unset
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
    /// Rolled files older than this many days are deleted at startup
    pub retain_days: i64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            file_prefix: "skyward.log".to_string(),
            retain_days: 7,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), String> {
        EnvFilter::try_new(&self.level).map_err(|e| format!("invalid log level '{}': {}", self.level, e))?;
        if self.file_prefix.trim().is_empty() {
            return Err("file_prefix must not be empty".to_string());
        }
        if self.retain_days < 1 {
            return Err("retain_days must be >= 1".to_string());
        }
        Ok(())
    }
}

fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> BridgeResult<()> {
    let filter = env_filter(config);
    let console_layer = fmt::layer().with_target(false).with_ansi(true);

    let Some(log_dir) = config.directory.as_ref() else {
        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .try_init()
            .map_err(|e| BridgeError::Config(format!("logging already initialized: {}", e)))?;
        tracing::info!("Skyward logging initialized (console only)");
        return Ok(());
    };

    std::fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, &config.file_prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    LOG_GUARD.set(guard).ok();

    let file_layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| BridgeError::Config(format!("logging already initialized: {}", e)))?;

    tracing::info!("Skyward logging initialized, directory {}", log_dir.display());

    let removed = cleanup_old_logs(log_dir, &config.file_prefix, config.retain_days);
    if removed > 0 {
        tracing::info!("Removed {} old log files", removed);
    }
    Ok(())
}

/// Delete `<prefix>.<YYYY-MM-DD>` files older than `keep_days`. Returns how many were removed.
pub fn cleanup_old_logs(log_dir: &Path, prefix: &str, keep_days: i64) -> usize {
    let cutoff = chrono::Utc::now().date_naive() - chrono::Duration::days(keep_days);

    let entries = match std::fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!("Cannot read log directory for cleanup: {}", e);
            return 0;
        }
    };

    let dated_prefix = format!("{}.", prefix);
    let mut removed = 0;

    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(date_str) = name.strip_prefix(&dated_prefix) else {
            continue;
        };
        let Ok(file_date) = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d") else {
            continue;
        };

        if file_date < cutoff {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!("Failed to remove old log {}: {}", path.display(), e),
            }
        }
    }

    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_validation() {
        assert!(LoggingConfig::default().validate().is_ok());

        let config = LoggingConfig {
            level: "skyward_link=debug,info".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let config = LoggingConfig {
            retain_days: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cleanup_old_logs() {
        let dir = std::env::temp_dir().join(format!("skyward-logs-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();

        let today = chrono::Utc::now().date_naive();
        let old = today - chrono::Duration::days(30);
        let files = [
            format!("skyward.log.{}", today.format("%Y-%m-%d")),
            format!("skyward.log.{}", old.format("%Y-%m-%d")),
            "skyward.log.not-a-date".to_string(),
            format!("other.log.{}", old.format("%Y-%m-%d")),
        ];
        for name in &files {
            std::fs::write(dir.join(name), "x").unwrap();
        }

        assert_eq!(cleanup_old_logs(&dir, "skyward.log", 7), 1);
        assert!(dir.join(&files[0]).exists());
        assert!(!dir.join(&files[1]).exists());
        assert!(dir.join(&files[2]).exists());
        assert!(dir.join(&files[3]).exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
