//! `execute_command`: allowlisted shell commands in the workspace.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::warn;

use crate::conversation::ToolResult;

/// `[terminal]` section of `.ntn/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalConfig {
    /// First word of a command must be one of these.
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,
    /// Regexes; a matching command needs explicit approval before it runs.
    #[serde(default = "default_confirm_patterns")]
    pub confirm_patterns: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

fn default_allowed_commands() -> Vec<String> {
    [
        "ls", "cat", "head", "tail", "wc", "find", "grep", "less", "mkdir", "touch", "cp", "mv",
        "rm", "pwd", "echo", "tee", "git", "python", "python3", "pip", "pip3", "pytest", "black",
        "npm", "yarn", "node", "make", "gcc", "g++", "diff", "tree", "ps", "kill", "which",
        "chmod", "sed", "awk", "cargo", "rustc", "ruff", "mypy", "pylint",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_confirm_patterns() -> Vec<String> {
    [
        r"\brm\s+(-\w*\s+)*-\w*[rRf]",
        r"\bgit\s+push\b.*(--force|\s-f\b)",
        r"\bgit\s+reset\s+--hard\b",
        r"\bgit\s+clean\s+-\w*f",
        r"\bsudo\b",
        r"\bkill\s+-9\b",
        r"\bchmod\s+-R\b",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_output_bytes() -> usize {
    30_000
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            allowed_commands: default_allowed_commands(),
            confirm_patterns: default_confirm_patterns(),
            timeout_secs: default_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

impl TerminalConfig {
    pub fn validate(&self) -> Vec<String> {
        self.confirm_patterns
            .iter()
            .filter_map(|p| {
                Regex::new(p)
                    .err()
                    .map(|e| format!("Invalid terminal confirm pattern '{p}': {e}"))
            })
            .collect()
    }
}

/// Output recorded for a finished command.
#[derive(Debug, Serialize)]
struct CommandOutput {
    stdout: String,
    stderr: String,
    returncode: i32,
}

pub struct TerminalTool {
    workdir: PathBuf,
    allowed: Vec<String>,
    confirm: Vec<Regex>,
    timeout: Duration,
    max_output_bytes: usize,
}

impl TerminalTool {
    pub fn new(workdir: impl AsRef<Path>, config: &TerminalConfig) -> Result<Self> {
        let confirm = config
            .confirm_patterns
            .iter()
            .map(|p| Regex::new(p).with_context(|| format!("Invalid confirm pattern: {p}")))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            workdir: workdir.as_ref().to_path_buf(),
            allowed: config.allowed_commands.clone(),
            confirm,
            timeout: Duration::from_secs(config.timeout_secs),
            max_output_bytes: config.max_output_bytes,
        })
    }

    /// Reject commands whose first word is not allowlisted.
    pub fn check_allowed(&self, command: &str) -> Result<(), String> {
        let Some(name) = command.split_whitespace().next() else {
            return Err("Empty command".to_string());
        };
        if self.allowed.iter().any(|a| a == name) {
            Ok(())
        } else {
            Err(format!("Command '{name}' not in allowlist"))
        }
    }

    pub fn confirmation_prompt(&self, command: &str) -> Option<String> {
        self.confirm
            .iter()
            .find(|re| re.is_match(command))
            .map(|re| format!("Run `{command}`? (matches guarded pattern `{}`)", re.as_str()))
    }

    pub async fn run(&self, call_id: &str, command: &str) -> ToolResult {
        if let Err(reason) = self.check_allowed(command) {
            return ToolResult::error(call_id, reason);
        }

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return ToolResult::error(call_id, format!("Failed to spawn command: {e}"));
            }
            Err(_) => {
                warn!(call_id, command, "Command timed out");
                return ToolResult::error(
                    call_id,
                    format!("Command timed out after {}s", self.timeout.as_secs()),
                );
            }
        };

        let returncode = output.status.code().unwrap_or(-1);
        let recorded = CommandOutput {
            stdout: truncate_output(&String::from_utf8_lossy(&output.stdout), self.max_output_bytes),
            stderr: truncate_output(&String::from_utf8_lossy(&output.stderr), self.max_output_bytes),
            returncode,
        };
        let text = serde_json::to_string(&recorded)
            .unwrap_or_else(|e| format!("Failed to encode command output: {e}"));

        if output.status.success() {
            ToolResult::ok(call_id, text)
        } else {
            ToolResult::error(call_id, text)
        }
    }
}

/// Keep at most `max_bytes` of output, noting how much was dropped.
pub fn truncate_output(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "{}\n... [truncated {} bytes]",
        &text[..end],
        text.len() - end
    )
}
