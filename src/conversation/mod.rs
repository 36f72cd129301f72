//! In-memory conversation model: turns, tool rounds and their results.
//!
//! A `Turn` opens with a user message, accumulates zero or more `ToolRound`s (an
//! assistant response that requested tools, plus the results for those tools) and
//! closes with a final assistant message and a `TurnOutcome`. The session log is a
//! flat sequence of blocks; replaying it through the methods here rebuilds the same
//! structure the live session holds.

pub mod tool_call;

use serde::{Deserialize, Serialize};

pub use tool_call::{MountMode, RawToolCall, SandboxAction, ToolCall, ToolInvocation};

/// A single block of assistant output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse(ToolCall),
}

/// One assistant response as returned by the provider.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AssistantPayload {
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

impl AssistantPayload {
    /// A text-only payload.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
            stop_reason: Some("end_turn".to_string()),
        }
    }

    /// A payload requesting the given tool calls, optionally preceded by text.
    pub fn tool_calls(text: Option<&str>, calls: Vec<ToolCall>) -> Self {
        let mut content = Vec::new();
        if let Some(text) = text {
            content.push(ContentBlock::Text {
                text: text.to_string(),
            });
        }
        content.extend(calls.into_iter().map(ContentBlock::ToolUse));
        Self {
            content,
            stop_reason: Some("tool_use".to_string()),
        }
    }

    /// All text blocks joined with newlines.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::ToolUse(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.content.iter().filter_map(|block| match block {
            ContentBlock::ToolUse(call) => Some(call),
            ContentBlock::Text { .. } => None,
        })
    }

    pub fn has_tool_calls(&self) -> bool {
        self.calls().next().is_some()
    }

    pub fn call_ids(&self) -> Vec<String> {
        self.calls().map(|c| c.id.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Ok,
    Error,
    Refused,
}

impl std::fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolStatus::Ok => write!(f, "ok"),
            ToolStatus::Error => write!(f, "error"),
            ToolStatus::Refused => write!(f, "refused"),
        }
    }
}

/// Result of one tool call, keyed by the call id it answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub status: ToolStatus,
    pub output: String,
}

impl ToolResult {
    pub fn ok(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            status: ToolStatus::Ok,
            output: output.into(),
        }
    }

    pub fn error(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            status: ToolStatus::Error,
            output: output.into(),
        }
    }

    pub fn refused(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            status: ToolStatus::Refused,
            output: output.into(),
        }
    }

    /// Placeholder recorded for a call that never finished because the user interrupted.
    pub fn interrupted(call_id: impl Into<String>) -> Self {
        Self::error(call_id, "Tool execution was interrupted by the user")
    }

    pub fn is_error(&self) -> bool {
        self.status != ToolStatus::Ok
    }
}

/// An assistant response that requested tools, and the results gathered so far.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRound {
    pub response: AssistantPayload,
    pub results: Vec<ToolResult>,
}

impl ToolRound {
    pub fn new(response: AssistantPayload) -> Self {
        Self {
            response,
            results: Vec::new(),
        }
    }

    /// Call ids that have a result.
    pub fn answered_ids(&self) -> Vec<String> {
        self.results.iter().map(|r| r.call_id.clone()).collect()
    }

    /// Call ids still waiting for a result, in issue order.
    pub fn pending_ids(&self) -> Vec<String> {
        self.response
            .calls()
            .filter(|call| !self.results.iter().any(|r| r.call_id == call.id))
            .map(|call| call.id.clone())
            .collect()
    }

    pub fn pending_calls(&self) -> Vec<ToolCall> {
        let pending = self.pending_ids();
        self.response
            .calls()
            .filter(|call| pending.contains(&call.id))
            .cloned()
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.pending_ids().is_empty()
    }

    /// Merge results into the round. A result for an id that already has one replaces it;
    /// results for ids this round never issued are returned unmerged. Results stay sorted
    /// in call issue order.
    pub fn merge_results(&mut self, results: Vec<ToolResult>) -> Vec<ToolResult> {
        let order = self.response.call_ids();
        let mut rejected = Vec::new();
        for result in results {
            if !order.contains(&result.call_id) {
                rejected.push(result);
                continue;
            }
            match self.results.iter_mut().find(|r| r.call_id == result.call_id) {
                Some(existing) => *existing = result,
                None => self.results.push(result),
            }
        }
        self.results.sort_by_key(|r| {
            order
                .iter()
                .position(|id| *id == r.call_id)
                .unwrap_or(usize::MAX)
        });
        rejected
    }
}

/// How a turn ended. Every variant is a terminal marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnOutcome {
    Completed,
    Interrupted,
    Failed { error: String },
}

/// Whether a turn came from the user or was synthesized by compaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOrigin {
    Genuine,
    Summary { first_turn: usize, last_turn: usize },
}

/// Acknowledgement paired with a summary turn so role alternation stays valid.
pub const SUMMARY_ACK: &str = "Understood. I have the summary of our earlier work and will continue from it.";

#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    /// 1-based position in the live history.
    pub index: usize,
    pub origin: TurnOrigin,
    pub user_message: String,
    pub rounds: Vec<ToolRound>,
    pub final_message: Option<AssistantPayload>,
    pub outcome: Option<TurnOutcome>,
}

impl Turn {
    pub fn new(index: usize, user_message: impl Into<String>) -> Self {
        Self {
            index,
            origin: TurnOrigin::Genuine,
            user_message: user_message.into(),
            rounds: Vec::new(),
            final_message: None,
            outcome: None,
        }
    }

    /// A completed synthetic turn carrying a compaction summary.
    pub fn summary(index: usize, first_turn: usize, last_turn: usize, summary: &str) -> Self {
        Self {
            index,
            origin: TurnOrigin::Summary {
                first_turn,
                last_turn,
            },
            user_message: summary.to_string(),
            rounds: Vec::new(),
            final_message: Some(AssistantPayload::text(SUMMARY_ACK)),
            outcome: Some(TurnOutcome::Completed),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn is_summary(&self) -> bool {
        matches!(self.origin, TurnOrigin::Summary { .. })
    }

    pub fn last_round(&self) -> Option<&ToolRound> {
        self.rounds.last()
    }

    /// Round that still needs results, if any.
    pub fn open_round(&self) -> Option<&ToolRound> {
        self.rounds.last().filter(|round| !round.is_complete())
    }

    /// Record an assistant response: tool calls open a round, plain text is the final message.
    pub fn push_response(&mut self, payload: AssistantPayload) {
        if payload.has_tool_calls() {
            self.rounds.push(ToolRound::new(payload));
        } else {
            self.final_message = Some(payload);
        }
    }

    /// Merge results into the latest round. Returns results that answer no issued call.
    pub fn record_results(&mut self, results: Vec<ToolResult>) -> Vec<ToolResult> {
        match self.rounds.last_mut() {
            Some(round) => round.merge_results(results),
            None => results,
        }
    }

    pub fn finish(&mut self, outcome: TurnOutcome) {
        self.outcome = Some(outcome);
    }
}
