//! Rendering turns into provider messages.

use serde::Serialize;
use serde_json::Value;

use crate::conversation::{AssistantPayload, ContentBlock, ToolResult, ToolStatus, Turn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<MessageContent>,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![MessageContent::Text { text: text.into() }],
        }
    }
}

/// Wrap a compaction summary for presentation to the model.
pub fn summary_message_text(summary: &str) -> String {
    format!(
        "<conversation-summary>\nThe earlier part of this session was compacted. Summary:\n{summary}\n</conversation-summary>"
    )
}

/// Render the conversation as an alternating user/assistant message list.
///
/// Consecutive messages with the same role (for example after a turn that failed
/// before any assistant reply) are merged. Calls without a result are answered with
/// an interrupted placeholder so every `tool_use` has its `tool_result`.
pub fn render_turns(turns: &[Turn]) -> Vec<Message> {
    let mut messages: Vec<Message> = Vec::new();
    for turn in turns {
        let user_text = if turn.is_summary() {
            summary_message_text(&turn.user_message)
        } else {
            turn.user_message.clone()
        };
        push_merged(
            &mut messages,
            Role::User,
            vec![MessageContent::Text { text: user_text }],
        );

        for round in &turn.rounds {
            push_merged(&mut messages, Role::Assistant, assistant_content(&round.response));
            let results = round
                .response
                .calls()
                .map(|call| {
                    let result = round
                        .results
                        .iter()
                        .find(|r| r.call_id == call.id)
                        .cloned()
                        .unwrap_or_else(|| ToolResult::interrupted(&call.id));
                    tool_result_content(&result)
                })
                .collect();
            push_merged(&mut messages, Role::User, results);
        }

        if let Some(final_message) = &turn.final_message {
            push_merged(&mut messages, Role::Assistant, assistant_content(final_message));
        }
    }
    messages
}

fn assistant_content(payload: &AssistantPayload) -> Vec<MessageContent> {
    let content: Vec<MessageContent> = payload
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } if text.trim().is_empty() => None,
            ContentBlock::Text { text } => Some(MessageContent::Text { text: text.clone() }),
            ContentBlock::ToolUse(call) => Some(MessageContent::ToolUse {
                id: call.id.clone(),
                name: call.name().to_string(),
                input: call.input.clone(),
            }),
        })
        .collect();
    if content.is_empty() {
        vec![MessageContent::Text {
            text: "(no response)".to_string(),
        }]
    } else {
        content
    }
}

fn tool_result_content(result: &ToolResult) -> MessageContent {
    let content = match result.status {
        ToolStatus::Refused => format!("The user declined to run this tool. {}", result.output),
        _ => result.output.clone(),
    };
    MessageContent::ToolResult {
        tool_use_id: result.call_id.clone(),
        content,
        is_error: result.is_error(),
    }
}

fn push_merged(messages: &mut Vec<Message>, role: Role, content: Vec<MessageContent>) {
    match messages.last_mut() {
        Some(last) if last.role == role => last.content.extend(content),
        _ => messages.push(Message { role, content }),
    }
}
