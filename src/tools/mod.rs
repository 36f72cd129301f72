//! Tool definitions and dispatch.
//!
//! | Tool              | Backend                                   |
//! |-------------------|-------------------------------------------|
//! | `execute_command` | [`terminal::TerminalTool`], `sh -c`       |
//! | `web_search`      | [`web::WebTools`], DuckDuckGo HTML        |
//! | `fetch_webpage`   | [`web::WebTools`], plain GET + tag strip  |
//! | `docker_sandbox`  | [`sandbox::SandboxTool`], Docker          |

pub mod sandbox;
pub mod terminal;
pub mod web;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::conversation::tool_call::{DOCKER_SANDBOX, EXECUTE_COMMAND, FETCH_WEBPAGE, WEB_SEARCH};
use crate::conversation::{ToolCall, ToolInvocation, ToolResult};
use crate::log::SandboxState;

pub use sandbox::{DockerSandbox, SandboxConfig, SandboxManager, SandboxTool};
pub use terminal::{TerminalConfig, TerminalTool};
pub use web::WebTools;

/// Tool schema as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

fn definition(name: &str, description: &str, input_schema: Value) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
    }
}

/// Schemas for every built-in tool.
pub fn builtin_definitions() -> Vec<ToolDefinition> {
    vec![
        definition(
            EXECUTE_COMMAND,
            "Execute shell command in the coding workspace. Use for file operations, running scripts, git commands, building projects, etc.",
            json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "The shell command to execute"}
                },
                "required": ["command"]
            }),
        ),
        definition(
            WEB_SEARCH,
            "Search the web using DuckDuckGo. Returns titles, URLs, and snippets. Use for finding documentation, packages, error messages, etc.",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search query"}
                },
                "required": ["query"]
            }),
        ),
        definition(
            FETCH_WEBPAGE,
            "Fetch and extract text content from a URL. Use to read documentation, README files, or error descriptions.",
            json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "URL to fetch"}
                },
                "required": ["url"]
            }),
        ),
        definition(
            DOCKER_SANDBOX,
            "Manage a Docker sandbox container that persists for this session. Actions: start, mount (bind a host path into /workspace/<name>), exec (run a command inside the container), status.",
            json!({
                "type": "object",
                "properties": {
                    "action": {"type": "string", "enum": ["start", "mount", "exec", "status"]},
                    "host_path": {"type": "string", "description": "Host path to mount (mount only)"},
                    "mode": {"type": "string", "enum": ["ro", "rw"], "description": "Mount mode (mount only, default rw)"},
                    "command": {"type": "string", "description": "Command to run (exec only)"}
                },
                "required": ["action"]
            }),
        ),
    ]
}

/// Everything the session needs from its tools.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// A prompt to show the user before running `call`, or `None` if it may run unasked.
    fn confirmation_prompt(&self, call: &ToolCall) -> Option<String>;

    /// Run a call. Failures are reported in the result, never as an error.
    async fn execute(&self, call: &ToolCall) -> ToolResult;

    /// Current sandbox state, persisted by the session when it changes.
    fn sandbox_state(&self) -> SandboxState {
        SandboxState::default()
    }

    /// Reinstate sandbox state recovered from the log.
    fn restore_sandbox(&self, _state: SandboxState) {}
}

/// The built-in tool set.
pub struct Toolbox {
    terminal: TerminalTool,
    web: WebTools,
    sandbox: SandboxTool,
}

impl Toolbox {
    pub fn new(terminal: TerminalTool, web: WebTools, sandbox: SandboxTool) -> Self {
        Self {
            terminal,
            web,
            sandbox,
        }
    }
}

#[async_trait]
impl ToolExecutor for Toolbox {
    fn definitions(&self) -> Vec<ToolDefinition> {
        builtin_definitions()
    }

    fn confirmation_prompt(&self, call: &ToolCall) -> Option<String> {
        match &call.invocation {
            ToolInvocation::ExecuteCommand { command } => self.terminal.confirmation_prompt(command),
            _ => None,
        }
    }

    async fn execute(&self, call: &ToolCall) -> ToolResult {
        info!(call_id = %call.id, tool = call.name(), "Executing tool");
        let result = match &call.invocation {
            ToolInvocation::ExecuteCommand { command } => self.terminal.run(&call.id, command).await,
            ToolInvocation::WebSearch { query } => self.web.search(&call.id, query).await,
            ToolInvocation::FetchWebpage { url } => self.web.fetch(&call.id, url).await,
            ToolInvocation::Sandbox(action) => self.sandbox.handle(&call.id, action).await,
            ToolInvocation::Unknown { name, input } => unknown_tool_result(&call.id, name, input),
        };
        debug!(call_id = %call.id, status = %result.status, bytes = result.output.len(), "Tool finished");
        result
    }

    fn sandbox_state(&self) -> SandboxState {
        self.sandbox.state()
    }

    fn restore_sandbox(&self, state: SandboxState) {
        self.sandbox.restore(state);
    }
}

/// Error result for a call whose name or arguments could not be decoded.
pub fn unknown_tool_result(call_id: &str, name: &str, input: &Value) -> ToolResult {
    let reason = match ToolInvocation::decode(name, input) {
        Err(reason) => reason,
        Ok(_) => format!("Tool '{name}' could not be dispatched"),
    };
    ToolResult::error(call_id, reason)
}
