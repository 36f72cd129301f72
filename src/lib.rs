//! ntn: an interactive LLM agent whose session survives crashes.
//!
//! Every conversational event is appended to a line-delimited JSON log before
//! the session acts on it. Restarting against that log rebuilds the history and
//! picks up exactly where the previous process stopped, including in the middle
//! of tool execution. Long histories are compacted into summaries so requests
//! stay within the model's context window.

pub mod compaction;
pub mod config;
pub mod conversation;
pub mod errors;
pub mod log;
pub mod logging;
pub mod provider;
pub mod session;
pub mod tools;
pub mod ui;
