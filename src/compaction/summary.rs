//! Summarization prompt and summary post-processing.

use crate::conversation::{ContentBlock, Turn, TurnOutcome};

use super::estimator::BYTES_PER_TOKEN;

pub const SUMMARY_SYSTEM_PROMPT: &str = "You condense the history of a coding session so the session can continue with less context.";

pub const SUMMARY_INSTRUCTION: &str = "Summarize the conversation above so the assistant can continue the work without it. Preserve:\n\
- decisions made and the reasons given for them\n\
- every file path that was read, created, modified or deleted\n\
- commands run whose results still matter\n\
- outstanding next steps and open problems\n\
Write plain prose and bullet points. Do not invent details.";

/// Render turns as a plain transcript for the summarizer.
pub fn render_transcript(turns: &[Turn]) -> String {
    let mut out = String::new();
    for turn in turns {
        out.push_str(&format!("## Turn {}\n", turn.index));
        if turn.is_summary() {
            out.push_str(&format!("[Summary of earlier turns]\n{}\n", turn.user_message));
            continue;
        }
        out.push_str(&format!("User: {}\n", turn.user_message));
        for round in &turn.rounds {
            for block in &round.response.content {
                match block {
                    ContentBlock::Text { text } => out.push_str(&format!("Assistant: {text}\n")),
                    ContentBlock::ToolUse(call) => {
                        out.push_str(&format!("Tool call [{}] {}\n", call.id, call.describe()))
                    }
                }
            }
            for result in &round.results {
                out.push_str(&format!(
                    "Tool result [{}] ({}): {}\n",
                    result.call_id, result.status, result.output
                ));
            }
        }
        if let Some(final_message) = &turn.final_message {
            out.push_str(&format!("Assistant: {}\n", final_message.joined_text()));
        }
        match &turn.outcome {
            Some(TurnOutcome::Interrupted) => out.push_str("[Turn interrupted by the user]\n"),
            Some(TurnOutcome::Failed { error }) => {
                out.push_str(&format!("[Turn failed: {error}]\n"))
            }
            _ => {}
        }
        out.push('\n');
    }
    out
}

/// The single user message sent to the summarizer.
pub fn summary_request_text(turns: &[Turn]) -> String {
    format!(
        "<conversation>\n{}</conversation>\n\n{}",
        render_transcript(turns),
        SUMMARY_INSTRUCTION
    )
}

/// Clip a summary to at most `max_tokens` estimated tokens, on a char boundary.
pub fn truncate_summary(summary: &str, max_tokens: usize) -> String {
    let max_bytes = max_tokens * BYTES_PER_TOKEN;
    let summary = summary.trim();
    if summary.len() <= max_bytes {
        return summary.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !summary.is_char_boundary(end) {
        end -= 1;
    }
    summary[..end].to_string()
}
