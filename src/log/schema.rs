//! On-disk block schema for session logs.
//!
//! Each line of a `.jsonl` session log is one `LogRecord`: a contiguous sequence
//! number, a timestamp, and a `kind`-tagged block. Payload text is JSON-escaped, so a
//! newline never appears inside a record and no payload can imitate a block header.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversation::{AssistantPayload, MountMode, ToolResult, TurnOutcome};

pub const LOG_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub seq: u64,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub block: Block,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Block {
    Session(SessionHeader),
    User { text: String },
    Assistant(AssistantPayload),
    ToolResult { results: Vec<ToolResult> },
    EndTurn { outcome: TurnOutcome },
    CompactionEvent(CompactionEvent),
    Sandbox(SandboxState),
}

impl Block {
    /// Header label as it appears in the `kind` field.
    pub fn label(&self) -> &'static str {
        match self {
            Block::Session(_) => "SESSION",
            Block::User { .. } => "USER",
            Block::Assistant(_) => "ASSISTANT",
            Block::ToolResult { .. } => "TOOL_RESULT",
            Block::EndTurn { .. } => "END_TURN",
            Block::CompactionEvent(_) => "COMPACTION_EVENT",
            Block::Sandbox(_) => "SANDBOX",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHeader {
    pub version: u32,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub cwd: PathBuf,
    pub model: String,
}

impl SessionHeader {
    pub fn v1(session_id: impl Into<String>, cwd: impl Into<PathBuf>, model: impl Into<String>) -> Self {
        Self {
            version: LOG_FORMAT_VERSION,
            session_id: session_id.into(),
            created_at: Utc::now(),
            cwd: cwd.into(),
            model: model.into(),
        }
    }
}

/// Collapse of an inclusive range of turns into one summary turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionEvent {
    pub reason: String,
    /// 1-based, inclusive, relative to the history at the time of compaction.
    pub first_turn: usize,
    pub last_turn: usize,
    pub summary: String,
    pub estimated_before: usize,
    pub estimated_after: usize,
}

/// Persisted sandbox container and its bind mounts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SandboxState {
    pub container_id: Option<String>,
    #[serde(default)]
    pub mounts: Vec<SandboxMount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxMount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub mode: MountMode,
}
