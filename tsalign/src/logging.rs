//! Logging setup.
//!
//! Console output always, optionally as JSON; a daily rolling file when a log
//! directory is configured. Timestamps use the local timezone.

use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::{Error, Result};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "tsalign=info,tilt_codec=info";

/// Prefix of rolled log files, `tsalign.log.YYYY-MM-DD`.
const LOG_FILE_NAME: &str = "tsalign.log";

const DEFAULT_RETENTION_DAYS: i64 = 7;

/// Timer that uses the local timezone via chrono.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive; `RUST_LOG` wins when set.
    #[serde(default)]
    pub filter: Option<String>,
    /// Emit console logs as JSON lines.
    #[serde(default)]
    pub json: bool,
    /// Directory for rolling log files. No file output when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Rolled files older than this are deleted at startup.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

fn default_retention_days() -> i64 {
    DEFAULT_RETENTION_DAYS
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: None,
            json: false,
            dir: None,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

/// Filter directive for a `-v` count, layered over the configured filter.
pub fn filter_directive(config: &LoggingConfig, verbosity: u8) -> String {
    match verbosity {
        0 => config
            .filter
            .clone()
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        1 => "tsalign=debug,tilt_codec=debug".to_string(),
        _ => "tsalign=trace,tilt_codec=trace".to_string(),
    }
}

/// Install the global subscriber.
///
/// Returns the file writer guard when file logging is enabled; keep it alive
/// for the lifetime of the process.
pub fn init_logging(config: &LoggingConfig, verbosity: u8) -> Result<Option<WorkerGuard>> {
    let directive = filter_directive(config, verbosity);
    let filter = if verbosity == 0 {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directive))
    } else {
        EnvFilter::new(&directive)
    };

    let console = if config.json {
        fmt::layer()
            .json()
            .with_timer(LocalTimer)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_ansi(true)
            .with_timer(LocalTimer)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let (file, guard) = match &config.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| Error::Other(format!("Failed to set global default subscriber: {e}")))?;

    Ok(guard)
}

/// Delete rolled log files older than `retention_days`.
pub async fn cleanup_old_logs(log_dir: &Path, retention_days: i64) -> std::io::Result<usize> {
    let cutoff = (Utc::now() - chrono::Duration::days(retention_days)).date_naive();
    let prefix = format!("{LOG_FILE_NAME}.");

    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let mut deleted = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(date) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(prefix.as_str()))
            .and_then(|d| chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        else {
            continue;
        };

        if date < cutoff {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    deleted += 1;
                    debug!(path = %path.display(), "Deleted old log file");
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete old log file"),
            }
        }
    }

    if deleted > 0 {
        info!(count = deleted, "Cleaned up old log files");
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive() {
        let config = LoggingConfig::default();
        assert_eq!(filter_directive(&config, 0), DEFAULT_LOG_FILTER);
        assert_eq!(filter_directive(&config, 1), "tsalign=debug,tilt_codec=debug");
        assert_eq!(filter_directive(&config, 3), "tsalign=trace,tilt_codec=trace");

        let config = LoggingConfig {
            filter: Some("tsalign=warn".to_string()),
            ..Default::default()
        };
        assert_eq!(filter_directive(&config, 0), "tsalign=warn");
    }

    #[tokio::test]
    async fn test_cleanup_old_logs() {
        let dir = tempfile::tempdir().unwrap();
        let today = Local::now().date_naive().format("%Y-%m-%d").to_string();
        let keep = dir.path().join(format!("tsalign.log.{today}"));
        let old = dir.path().join("tsalign.log.2000-01-01");
        let other = dir.path().join("notes.txt");
        for path in [&keep, &old, &other] {
            std::fs::write(path, "x").unwrap();
        }

        let deleted = cleanup_old_logs(dir.path(), 7).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(keep.exists());
        assert!(!old.exists());
        assert!(other.exists());
    }
}
