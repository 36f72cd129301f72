//! Durable session log.
//!
//! One line-delimited JSON file per session under `.ntn/sessions/`. Blocks are only
//! ever appended; a session's in-memory state is always reconstructible from the
//! trusted prefix of its file.
//!
//! ## Components
//!
//! - [`schema`] — block and record types
//! - [`writer`] — exclusive, synchronously flushed appender
//! - [`reader`] — tolerant bytes-to-records pass that finds the trusted prefix
//! - [`replay`] — records-to-turns pass and resume cursor classification
//! - [`paths`] — file naming and session discovery

pub mod paths;
pub mod reader;
pub mod replay;
pub mod schema;
pub mod writer;

pub use reader::{RawLog, Truncation, parse_log, read_log};
pub use replay::{ResumeCursor, SessionLog, classify_tail, load, pending_calls, replay};
pub use schema::{
    Block, CompactionEvent, LOG_FORMAT_VERSION, LogRecord, SandboxMount, SandboxState,
    SessionHeader,
};
pub use writer::{LogWriter, untrusted_tail_path};
