//! LLM provider seam.
//!
//! The session talks to the model only through [`LlmProvider`]. The Anthropic
//! Messages API adapter lives in [`anthropic`]; tests substitute scripted providers.

pub mod anthropic;
pub mod messages;
pub mod retry;

use async_trait::async_trait;

use crate::conversation::AssistantPayload;
use crate::errors::ProviderError;
use crate::tools::ToolDefinition;

pub use anthropic::AnthropicProvider;
pub use messages::{Message, MessageContent, Role, render_turns};
pub use retry::{RetryPolicy, complete_with_retry};

pub const DEFAULT_MODEL: &str = "claude-opus-4-5";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// System preamble naming the workspace the agent operates in.
pub fn default_system_prompt(workspace: &std::path::Path) -> String {
    format!(
        "You are an AI coding assistant with access to a workspace at {}.\n\
You can execute shell commands, search the web, and fetch documentation.\n\
Always verify your actions and explain what you're doing.",
        workspace.display()
    )
}

/// A fully rendered completion request.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: u32,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<AssistantPayload, ProviderError>;

    fn model(&self) -> &str;
}
