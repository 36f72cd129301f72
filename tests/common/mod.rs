//! Scripted collaborators for driving a `Session` without a network, a
//! terminal or Docker.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};

use ntn::compaction::{CompactionConfig, Compactor, TokenEstimator};
use ntn::conversation::{AssistantPayload, ToolCall, ToolInvocation, ToolResult, TurnOutcome};
use ntn::errors::ProviderError;
use ntn::log::{Block, LogWriter, SessionHeader};
use ntn::provider::{CompletionRequest, LlmProvider, RetryPolicy};
use ntn::session::{Console, Interrupt, SessionEvent, SessionOptions, SessionParts};
use ntn::tools::{ToolDefinition, ToolExecutor, builtin_definitions};

/// Replies from a queue and records every request it receives.
#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<AssistantPayload, ProviderError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Result<AssistantPayload, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<AssistantPayload, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(ProviderError::Fatal {
                    status: None,
                    message: "script exhausted".to_string(),
                })
            })
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

/// Answers every call with `ran <description>` and counts executions per call id.
#[derive(Default)]
pub struct ScriptedTools {
    executions: Mutex<HashMap<String, usize>>,
    guarded: HashSet<String>,
    /// Call id that triggers this interrupt and then never finishes.
    hang_on: Option<(String, Interrupt)>,
}

impl ScriptedTools {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Tools whose calls need confirmation.
    pub fn guarding(names: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            guarded: names.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        })
    }

    pub fn hanging_on(call_id: &str, interrupt: Interrupt) -> Arc<Self> {
        Arc::new(Self {
            hang_on: Some((call_id.to_string(), interrupt)),
            ..Self::default()
        })
    }

    pub fn executions(&self, call_id: &str) -> usize {
        self.executions
            .lock()
            .unwrap()
            .get(call_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_executions(&self) -> usize {
        self.executions.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl ToolExecutor for ScriptedTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        builtin_definitions()
    }

    fn confirmation_prompt(&self, call: &ToolCall) -> Option<String> {
        self.guarded
            .contains(call.name())
            .then(|| format!("Run {}?", call.describe()))
    }

    async fn execute(&self, call: &ToolCall) -> ToolResult {
        *self
            .executions
            .lock()
            .unwrap()
            .entry(call.id.clone())
            .or_insert(0) += 1;
        if let Some((id, interrupt)) = &self.hang_on
            && *id == call.id
        {
            interrupt.trigger();
            std::future::pending::<()>().await;
        }
        ToolResult::ok(&call.id, format!("ran {}", call.describe()))
    }
}

/// Feeds queued input lines and confirmation answers, then reports end of input.
#[derive(Default)]
pub struct ScriptedConsole {
    inputs: Mutex<VecDeque<String>>,
    answers: Mutex<VecDeque<bool>>,
    events: Mutex<Vec<SessionEvent>>,
}

impl ScriptedConsole {
    pub fn new(inputs: &[&str]) -> Arc<Self> {
        Self::with_answers(inputs, &[])
    }

    pub fn with_answers(inputs: &[&str], answers: &[bool]) -> Arc<Self> {
        Arc::new(Self {
            inputs: Mutex::new(inputs.iter().map(|s| s.to_string()).collect()),
            answers: Mutex::new(answers.iter().copied().collect()),
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Console for ScriptedConsole {
    async fn read_input(&self) -> Result<Option<String>> {
        Ok(self.inputs.lock().unwrap().pop_front())
    }

    async fn confirm(&self, _prompt: &str) -> Result<bool> {
        Ok(self.answers.lock().unwrap().pop_front().unwrap_or(false))
    }

    fn show(&self, event: SessionEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub fn no_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 1,
        base_delay_ms: 1,
        max_delay_ms: 1,
        ..RetryPolicy::default()
    }
}

/// A compactor that never triggers on test-sized conversations.
pub fn roomy_compactor() -> Compactor {
    Compactor::new(CompactionConfig::default(), TokenEstimator::default())
}

pub fn parts(
    provider: Arc<ScriptedProvider>,
    tools: Arc<ScriptedTools>,
    console: Arc<ScriptedConsole>,
    compactor: Compactor,
    interrupt: Interrupt,
) -> SessionParts {
    SessionParts {
        provider,
        tools,
        console,
        compactor,
        interrupt,
        options: SessionOptions {
            system_prompt: "You are a test agent.".to_string(),
            retry: no_retry(),
            ..SessionOptions::default()
        },
    }
}

pub fn log_path(dir: &Path) -> PathBuf {
    dir.join(".ntn")
        .join("sessions")
        .join("2026-01-01T00-00-00.000Z_test.jsonl")
}

pub fn header() -> SessionHeader {
    SessionHeader::v1("test", "/workspace", "scripted")
}

/// Write a log holding the given blocks after its header, as a crashed session would have.
pub fn write_log(path: &Path, blocks: &[Block]) {
    let mut writer = LogWriter::create(path, header()).unwrap();
    for block in blocks {
        writer.write_block(block).unwrap();
    }
}

/// The `kind` of every line in the log.
pub fn kinds(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| {
            let value: Value = serde_json::from_str(line).unwrap();
            value["kind"].as_str().unwrap().to_string()
        })
        .collect()
}

pub fn call(id: &str, name: &str, input: Value) -> ToolCall {
    serde_json::from_value(json!({ "id": id, "name": name, "input": input })).unwrap()
}

pub fn command(id: &str, command: &str) -> ToolCall {
    ToolCall::new(
        id,
        ToolInvocation::ExecuteCommand {
            command: command.to_string(),
        },
    )
}

pub fn user(text: &str) -> Block {
    Block::User {
        text: text.to_string(),
    }
}

pub fn assistant_text(text: &str) -> Block {
    Block::Assistant(AssistantPayload::text(text))
}

pub fn assistant_calls(calls: Vec<ToolCall>) -> Block {
    Block::Assistant(AssistantPayload::tool_calls(None, calls))
}

pub fn end_turn() -> Block {
    Block::EndTurn {
        outcome: TurnOutcome::Completed,
    }
}
