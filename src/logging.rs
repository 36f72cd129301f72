//! Diagnostic logging to `.ntn/logs/ntn.log`.
//!
//! The console belongs to the conversation, so tracing output goes to a file.
//! `NTN_LOG` takes an `EnvFilter` directive; without it the level is `info`,
//! or `debug` with `--verbose`.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE: &str = "ntn.log";
pub const LOG_ENV: &str = "NTN_LOG";

fn env_filter(verbose: bool) -> EnvFilter {
    let default_level = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global subscriber. Keep the guard alive until exit so buffered
/// lines are flushed.
pub fn init(log_dir: &Path, verbose: bool) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
    let appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    // A subscriber may already be installed (tests, repeated init); that is not an error.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose))
        .with_ansi(false)
        .with_target(true)
        .with_writer(writer)
        .try_init();
    Ok(guard)
}
