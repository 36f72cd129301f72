//! Conservative token estimation for the next model request.

use crate::conversation::{AssistantPayload, ContentBlock, Turn};
use crate::provider::messages::summary_message_text;
use crate::tools::ToolDefinition;

/// Bytes per token assumed by the estimator. Real tokenizers average closer to four
/// for English prose, so three over-counts for most text.
pub const BYTES_PER_TOKEN: usize = 3;

/// Framing cost charged for every message in the request.
pub const DEFAULT_MESSAGE_OVERHEAD: usize = 8;

/// Approximates the token size of a request built from a system preamble, tool
/// definitions and the conversation so far.
///
/// Every component is non-negative, so adding a turn or growing any part of one never
/// lowers the estimate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEstimator {
    /// Tokens charged once per request (system prompt, tool schemas).
    pub fixed_overhead: usize,
    pub per_message_overhead: usize,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self {
            fixed_overhead: 0,
            per_message_overhead: DEFAULT_MESSAGE_OVERHEAD,
        }
    }
}

impl TokenEstimator {
    pub fn new(fixed_overhead: usize, per_message_overhead: usize) -> Self {
        Self {
            fixed_overhead,
            per_message_overhead,
        }
    }

    /// Estimator whose fixed overhead covers the given preamble and tool schemas.
    pub fn for_request(system_prompt: &str, tools: &[ToolDefinition]) -> Self {
        let tool_tokens: usize = tools
            .iter()
            .map(|tool| {
                text_tokens(&tool.name)
                    + text_tokens(&tool.description)
                    + text_tokens(&tool.input_schema.to_string())
            })
            .sum();
        Self {
            fixed_overhead: text_tokens(system_prompt) + tool_tokens,
            per_message_overhead: DEFAULT_MESSAGE_OVERHEAD,
        }
    }

    pub fn estimate(&self, turns: &[Turn]) -> usize {
        self.fixed_overhead + turns.iter().map(|t| self.turn_tokens(t)).sum::<usize>()
    }

    pub fn turn_tokens(&self, turn: &Turn) -> usize {
        let user_tokens = if turn.is_summary() {
            text_tokens(&summary_message_text(&turn.user_message))
        } else {
            text_tokens(&turn.user_message)
        };
        let mut tokens = self.per_message_overhead + user_tokens;
        for round in &turn.rounds {
            tokens += self.payload_tokens(&round.response);
            // Results travel back as one user message.
            tokens += self.per_message_overhead;
            for result in &round.results {
                tokens += text_tokens(&result.call_id) + text_tokens(&result.output);
            }
        }
        if let Some(final_message) = &turn.final_message {
            tokens += self.payload_tokens(final_message);
        }
        tokens
    }

    fn payload_tokens(&self, payload: &AssistantPayload) -> usize {
        let body: usize = payload
            .content
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => text_tokens(text),
                ContentBlock::ToolUse(call) => {
                    text_tokens(&call.id)
                        + text_tokens(call.name())
                        + text_tokens(&call.input.to_string())
                }
            })
            .sum();
        self.per_message_overhead + body
    }
}

/// Token estimate for a piece of text.
pub fn text_tokens(text: &str) -> usize {
    text.len().div_ceil(BYTES_PER_TOKEN)
}
