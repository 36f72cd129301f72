//! Anthropic Messages API adapter.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::messages::Message;
use super::{CompletionRequest, LlmProvider, RetryPolicy};
use crate::conversation::{AssistantPayload, ContentBlock, RawToolCall, ToolCall};
use crate::errors::ProviderError;
use crate::tools::ToolDefinition;

pub const DEFAULT_API_URL: &str = "https://api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "is_blank")]
    system: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [ToolDefinition],
}

fn is_blank(system: &&str) -> bool {
    system.is_empty()
}

fn no_tools(tools: &&[ToolDefinition]) -> bool {
    tools.is_empty()
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

impl AnthropicProvider {
    /// `retry` classifies HTTP failures; the retry loop itself runs in the caller.
    pub fn new(
        api_key: impl Into<String>,
        api_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Fatal {
                status: None,
                message: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            retry,
        })
    }

    fn classify(&self, status: u16, body: &str) -> ProviderError {
        let message = error_message(body);
        if self.retry.is_retryable_http_error(status, &message) {
            ProviderError::Retryable {
                status: Some(status),
                message,
            }
        } else {
            ProviderError::Fatal {
                status: Some(status),
                message,
            }
        }
    }
}

/// Pull `error.message` out of an Anthropic error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

fn into_payload(response: MessagesResponse) -> AssistantPayload {
    let content = response
        .content
        .into_iter()
        .filter_map(|block| match block {
            ResponseBlock::Text { text } => Some(ContentBlock::Text { text }),
            ResponseBlock::ToolUse { id, name, input } => Some(ContentBlock::ToolUse(
                ToolCall::from(RawToolCall { id, name, input }),
            )),
            ResponseBlock::Other => None,
        })
        .collect();
    AssistantPayload {
        content,
        stop_reason: response.stop_reason,
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<AssistantPayload, ProviderError> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            system: &request.system,
            messages: &request.messages,
            tools: &request.tools,
        };

        debug!(
            model = %self.model,
            messages = request.messages.len(),
            "Sending messages request"
        );
        let response = self
            .client
            .post(format!("{}/v1/messages", self.api_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Retryable {
                status: None,
                message: format!("Request failed: {e}"),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| ProviderError::Retryable {
            status: Some(status.as_u16()),
            message: format!("Failed to read response body: {e}"),
        })?;
        if !status.is_success() {
            return Err(self.classify(status.as_u16(), &text));
        }

        let parsed: MessagesResponse =
            serde_json::from_str(&text).map_err(|e| ProviderError::Fatal {
                status: Some(status.as_u16()),
                message: format!("Unexpected response shape: {e}"),
            })?;
        Ok(into_payload(parsed))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ToolInvocation;

    fn provider() -> AnthropicProvider {
        AnthropicProvider::new(
            "key",
            "http://localhost:1/",
            "test-model",
            Duration::from_secs(1),
            RetryPolicy::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_response_blocks_become_payload() {
        let response: MessagesResponse = serde_json::from_value(serde_json::json!({
            "content": [
                {"type": "thinking", "thinking": "hmm"},
                {"type": "text", "text": "Listing files."},
                {"type": "tool_use", "id": "toolu_1", "name": "execute_command", "input": {"command": "ls"}}
            ],
            "stop_reason": "tool_use"
        }))
        .unwrap();
        let payload = into_payload(response);
        assert_eq!(payload.content.len(), 2);
        assert_eq!(payload.joined_text(), "Listing files.");
        let call = payload.calls().next().unwrap();
        assert_eq!(
            call.invocation,
            ToolInvocation::ExecuteCommand {
                command: "ls".into()
            }
        );
        assert_eq!(payload.stop_reason.as_deref(), Some("tool_use"));
    }

    #[test]
    fn test_classify_statuses() {
        let p = provider();
        let body = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        let err = p.classify(529, body);
        assert!(err.is_retryable());
        assert!(err.to_string().contains("Overloaded"));

        let body = r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#;
        assert!(!p.classify(401, body).is_retryable());
        assert!(!p.classify(400, "prompt is too long").is_retryable());
    }

    #[test]
    fn test_request_omits_empty_tools() {
        let messages = vec![Message::user_text("hi")];
        let body = MessagesRequest {
            model: "m",
            max_tokens: 10,
            system: "",
            messages: &messages,
            tools: &[],
        };
        let value = serde_json::to_value(&body).unwrap();
        assert!(value.get("tools").is_none());
        assert!(value.get("system").is_none());
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["content"][0]["type"], "text");
    }

    #[test]
    fn test_api_url_trailing_slash_is_trimmed() {
        assert_eq!(provider().api_url, "http://localhost:1");
    }
}
