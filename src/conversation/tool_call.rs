//! Typed tool-call payloads.
//!
//! On the wire (log and provider API) a call is `{id, name, input}`. In memory the
//! known tools decode into typed variants; anything else, including a known name whose
//! arguments do not decode, stays as `Unknown`. The model's `input` is kept verbatim
//! next to the typed arguments, so every call round-trips unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const EXECUTE_COMMAND: &str = "execute_command";
pub const WEB_SEARCH: &str = "web_search";
pub const FETCH_WEBPAGE: &str = "fetch_webpage";
pub const DOCKER_SANDBOX: &str = "docker_sandbox";

/// A single tool-call request issued by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawToolCall", into = "RawToolCall")]
pub struct ToolCall {
    pub id: String,
    pub invocation: ToolInvocation,
    /// Arguments exactly as the model sent them.
    pub input: Value,
}

/// What the model asked for, with typed arguments per known tool.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInvocation {
    ExecuteCommand { command: String },
    WebSearch { query: String },
    FetchWebpage { url: String },
    Sandbox(SandboxAction),
    Unknown { name: String, input: Value },
}

/// Actions accepted by the `docker_sandbox` tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SandboxAction {
    Start,
    Mount {
        host_path: String,
        #[serde(default)]
        mode: MountMode,
    },
    Exec { command: String },
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MountMode {
    #[serde(rename = "ro")]
    ReadOnly,
    #[default]
    #[serde(rename = "rw")]
    ReadWrite,
}

impl std::fmt::Display for MountMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MountMode::ReadOnly => write!(f, "ro"),
            MountMode::ReadWrite => write!(f, "rw"),
        }
    }
}

/// Wire shape shared by the log and the Anthropic `tool_use` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub input: Value,
}

#[derive(Deserialize)]
struct CommandArgs {
    command: String,
}

#[derive(Deserialize)]
struct QueryArgs {
    query: String,
}

#[derive(Deserialize)]
struct UrlArgs {
    url: String,
}

impl ToolInvocation {
    /// Decode a named call, reporting why a known tool's arguments were rejected.
    pub fn decode(name: &str, input: &Value) -> Result<Self, String> {
        let invalid = |e: serde_json::Error| format!("Invalid arguments for {name}: {e}");
        match name {
            EXECUTE_COMMAND => serde_json::from_value::<CommandArgs>(input.clone())
                .map(|a| ToolInvocation::ExecuteCommand { command: a.command })
                .map_err(invalid),
            WEB_SEARCH => serde_json::from_value::<QueryArgs>(input.clone())
                .map(|a| ToolInvocation::WebSearch { query: a.query })
                .map_err(invalid),
            FETCH_WEBPAGE => serde_json::from_value::<UrlArgs>(input.clone())
                .map(|a| ToolInvocation::FetchWebpage { url: a.url })
                .map_err(invalid),
            DOCKER_SANDBOX => serde_json::from_value::<SandboxAction>(input.clone())
                .map(ToolInvocation::Sandbox)
                .map_err(invalid),
            other => Err(format!("Unknown tool '{other}'")),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ToolInvocation::ExecuteCommand { .. } => EXECUTE_COMMAND,
            ToolInvocation::WebSearch { .. } => WEB_SEARCH,
            ToolInvocation::FetchWebpage { .. } => FETCH_WEBPAGE,
            ToolInvocation::Sandbox(_) => DOCKER_SANDBOX,
            ToolInvocation::Unknown { name, .. } => name,
        }
    }

    /// Canonical arguments for a call built in code rather than decoded.
    pub fn input(&self) -> Value {
        match self {
            ToolInvocation::ExecuteCommand { command } => json!({ "command": command }),
            ToolInvocation::WebSearch { query } => json!({ "query": query }),
            ToolInvocation::FetchWebpage { url } => json!({ "url": url }),
            ToolInvocation::Sandbox(action) => {
                serde_json::to_value(action).unwrap_or(Value::Null)
            }
            ToolInvocation::Unknown { input, .. } => input.clone(),
        }
    }
}

impl From<RawToolCall> for ToolCall {
    fn from(raw: RawToolCall) -> Self {
        let invocation = ToolInvocation::decode(&raw.name, &raw.input).unwrap_or_else(|_| {
            ToolInvocation::Unknown {
                name: raw.name,
                input: raw.input.clone(),
            }
        });
        ToolCall {
            id: raw.id,
            invocation,
            input: raw.input,
        }
    }
}

impl From<ToolCall> for RawToolCall {
    fn from(call: ToolCall) -> Self {
        RawToolCall {
            name: call.invocation.name().to_string(),
            input: call.input,
            id: call.id,
        }
    }
}

impl ToolCall {
    pub fn new(id: impl Into<String>, invocation: ToolInvocation) -> Self {
        Self {
            id: id.into(),
            input: invocation.input(),
            invocation,
        }
    }

    pub fn name(&self) -> &str {
        self.invocation.name()
    }

    /// One-line description used in console output and summaries.
    pub fn describe(&self) -> String {
        match &self.invocation {
            ToolInvocation::ExecuteCommand { command } => format!("{EXECUTE_COMMAND}: {command}"),
            ToolInvocation::WebSearch { query } => format!("{WEB_SEARCH}: {query}"),
            ToolInvocation::FetchWebpage { url } => format!("{FETCH_WEBPAGE}: {url}"),
            ToolInvocation::Sandbox(action) => match action {
                SandboxAction::Start => format!("{DOCKER_SANDBOX}: start"),
                SandboxAction::Mount { host_path, mode } => {
                    format!("{DOCKER_SANDBOX}: mount {host_path} ({mode})")
                }
                SandboxAction::Exec { command } => format!("{DOCKER_SANDBOX}: exec {command}"),
                SandboxAction::Status => format!("{DOCKER_SANDBOX}: status"),
            },
            ToolInvocation::Unknown { name, input } => format!("{name}: {input}"),
        }
    }
}
