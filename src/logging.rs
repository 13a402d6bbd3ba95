//! Tracing setup shared by both binaries.
//!
//! On Linux the subscriber writes to systemd's journal when it is reachable.
//! Otherwise logs go to a daily-rolling file. `--once` runs of the daemon log
//! to stderr instead, since their output is usually read off a terminal or
//! a cron mail.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_ENV: &str = "SITEWATCH_LOG";
const LOG_FILE: &str = "sitewatch.log";

/// Where log output ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogBackend {
    Journald,
    File(PathBuf),
    Stderr,
}

/// Filter from `SITEWATCH_LOG` in `EnvFilter` syntax
/// (`debug`, `sitewatch=trace,tower_http=info`, ...), `info` when unset.
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sitewatch")
        .join("logs")
}

/// Install the global subscriber: journald if possible, else a file in
/// `log_dir` (default: the user's local data dir).
pub fn init(log_dir: Option<PathBuf>) -> Result<LogBackend> {
    #[cfg(target_os = "linux")]
    {
        if let Ok(journald) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(journald)
                .try_init()?;
            tracing::info!("Logging to journald");
            return Ok(LogBackend::Journald);
        }
    }

    let log_dir = log_dir.unwrap_or_else(default_log_dir);
    std::fs::create_dir_all(&log_dir)?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, LOG_FILE));

    // The writer thread stops when its guard drops.
    static GUARD: OnceLock<WorkerGuard> = OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init()?;

    tracing::info!("Logging to {}", log_dir.join(LOG_FILE).display());
    Ok(LogBackend::File(log_dir))
}

pub fn init_stderr() -> Result<LogBackend> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()?;
    Ok(LogBackend::Stderr)
}
