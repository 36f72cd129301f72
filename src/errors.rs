//! Typed error hierarchy for ntn.
//!
//! Four enums cover the subsystems that surface failures to the session:
//! - `LogError` — session log I/O, encoding and locking
//! - `CompactionError` — compaction events that do not fit the current history
//! - `ProviderError` — LLM completion failures, split into retryable and fatal
//! - `SessionError` — failures that terminate a running session

use std::path::PathBuf;

use thiserror::Error;

/// Errors from reading or appending the session log.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Failed to {operation} session log at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode log block: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Session log {path} is already in use by another session")]
    Locked { path: PathBuf },

    #[error("Session log {path} has no readable session header")]
    MissingHeader { path: PathBuf },
}

impl LogError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LogError::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}

/// A compaction event whose turn range cannot be applied to the history it targets.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompactionError {
    #[error("Compaction range {first}..={last} is invalid for {len} turns")]
    InvalidRange { first: usize, last: usize, len: usize },

    #[error("Compaction range includes incomplete turn {turn}")]
    IncompleteTurn { turn: usize },
}

/// Errors from an LLM completion request.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Rate limits, overload and transport failures. Safe to retry.
    #[error("Transient provider error{}: {message}", status_suffix(.status))]
    Retryable { status: Option<u16>, message: String },

    /// Authentication, invalid requests, oversized requests. Retrying will not help.
    #[error("Provider rejected the request{}: {message}", status_suffix(.status))]
    Fatal { status: Option<u16>, message: String },

    /// The user interrupted the request before it completed.
    #[error("Request interrupted")]
    Interrupted,
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (HTTP {code})"),
        None => String::new(),
    }
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Retryable { .. })
    }
}

/// Errors that end a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session log write failed (log: {log_path}): {source}")]
    LogWrite {
        log_path: PathBuf,
        #[source]
        source: LogError,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
