//! What the session needs from the person at the keyboard.

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;

use crate::conversation::ToolStatus;

/// Something worth showing the user while the session runs.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Resumed {
        log_path: PathBuf,
        turns: usize,
        cursor: String,
    },
    AssistantText(String),
    ToolCall {
        call_id: String,
        description: String,
    },
    ToolResult {
        call_id: String,
        status: ToolStatus,
        output: String,
    },
    Compacted {
        first_turn: usize,
        last_turn: usize,
        estimated_before: usize,
        estimated_after: usize,
    },
    TurnInterrupted,
    TurnFailed(String),
    Warning(String),
}

#[async_trait]
pub trait Console: Send + Sync {
    /// Next line of user input, or `None` at end of input.
    async fn read_input(&self) -> Result<Option<String>>;

    async fn confirm(&self, prompt: &str) -> Result<bool>;

    fn show(&self, event: SessionEvent);

    /// Indicate that the session is waiting on the model (`Some`) or done waiting (`None`).
    fn waiting(&self, _message: Option<&str>) {}
}
