//! The session state machine.
//!
//! ```text
//!             ┌──────────────────────────────────────────────┐
//!             v                                              │
//! RESUMING ─> AWAITING_INPUT ─> REQUESTING_MODEL ─> EXECUTING_TOOLS
//!             │    ^                 │    ^                  │
//!             │    └─────────────────┘    └──────────────────┘
//!             └─> TERMINATED
//! ```
//!
//! Every transition is preceded by the log write that makes it durable, so a
//! replay of the log lands in the same state the live session was in.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tracing::{debug, error, info, warn};

use super::console::{Console, SessionEvent};
use super::interrupt::Interrupt;
use crate::compaction::{Compactor, apply_compaction};
use crate::config::DEFAULT_MAX_ROUNDS_PER_TURN;
use crate::conversation::{AssistantPayload, ToolCall, ToolResult, Turn, TurnOutcome};
use crate::errors::{ProviderError, SessionError};
use crate::log::{
    Block, LogWriter, ResumeCursor, SandboxState, SessionHeader, SessionLog, pending_calls,
};
use crate::provider::{
    CompletionRequest, DEFAULT_MAX_TOKENS, LlmProvider, RetryPolicy, complete_with_retry,
    render_turns,
};
use crate::tools::ToolExecutor;

pub const ROUND_LIMIT_ERROR: &str = "round limit reached";
pub const DECLINED_OUTPUT: &str = "User declined to run this tool call";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Startup from a prior log; resolved by the first `step`.
    Resuming(ResumeCursor),
    AwaitingInput,
    RequestingModel,
    ExecutingTools,
    Terminated,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Resuming(cursor) => write!(f, "RESUMING ({cursor})"),
            SessionState::AwaitingInput => write!(f, "AWAITING_INPUT"),
            SessionState::RequestingModel => write!(f, "REQUESTING_MODEL"),
            SessionState::ExecutingTools => write!(f, "EXECUTING_TOOLS"),
            SessionState::Terminated => write!(f, "TERMINATED"),
        }
    }
}

/// Per-session settings resolved from configuration.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub system_prompt: String,
    pub max_tokens: u32,
    /// Model responses allowed within one turn.
    pub max_rounds_per_turn: usize,
    pub retry: RetryPolicy,
    /// Run guarded tool calls without asking.
    pub auto_approve: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            max_tokens: DEFAULT_MAX_TOKENS,
            max_rounds_per_turn: DEFAULT_MAX_ROUNDS_PER_TURN,
            retry: RetryPolicy::default(),
            auto_approve: false,
        }
    }
}

/// Collaborators a session is assembled from.
pub struct SessionParts {
    pub provider: Arc<dyn LlmProvider>,
    pub tools: Arc<dyn ToolExecutor>,
    pub console: Arc<dyn Console>,
    pub compactor: Compactor,
    pub interrupt: Interrupt,
    pub options: SessionOptions,
}

pub struct Session {
    id: String,
    writer: LogWriter,
    turns: Vec<Turn>,
    state: SessionState,
    /// Sandbox state as last written to the log.
    sandbox: SandboxState,
    compactions: usize,
    rounds_this_turn: usize,
    provider: Arc<dyn LlmProvider>,
    tools: Arc<dyn ToolExecutor>,
    console: Arc<dyn Console>,
    compactor: Compactor,
    interrupt: Interrupt,
    options: SessionOptions,
}

impl Session {
    /// Create a new log at `path` and start waiting for input.
    pub fn start(path: &Path, header: SessionHeader, parts: SessionParts) -> Result<Self, SessionError> {
        let id = header.session_id.clone();
        let writer = LogWriter::create(path, header).map_err(|source| SessionError::LogWrite {
            log_path: path.to_path_buf(),
            source,
        })?;
        info!(session_id = %id, log = %path.display(), "Session started");
        Ok(Self::assemble(
            id,
            writer,
            Vec::new(),
            SessionState::AwaitingInput,
            SandboxState::default(),
            0,
            parts,
        ))
    }

    /// Continue a session from its replayed log.
    pub fn resume(log: SessionLog, parts: SessionParts) -> Result<Self, SessionError> {
        let writer =
            LogWriter::resume(&log.path, log.trusted_len, log.next_seq).map_err(|source| {
                SessionError::LogWrite {
                    log_path: log.path.clone(),
                    source,
                }
            })?;

        let sandbox = log.sandbox.clone().unwrap_or_default();
        parts.tools.restore_sandbox(sandbox.clone());

        for warning in &log.warnings {
            parts.console.show(SessionEvent::Warning(warning.clone()));
        }
        if let Some(truncation) = &log.truncation {
            warn!(log = %log.path.display(), %truncation, "Ignoring untrusted log tail");
            parts.console.show(SessionEvent::Warning(format!(
                "Ignoring log tail from {truncation}"
            )));
        }
        if let Some(sidecar) = writer.preserved_tail() {
            parts.console.show(SessionEvent::Warning(format!(
                "Untrusted blocks moved to {}",
                sidecar.display()
            )));
        }
        parts.console.show(SessionEvent::Resumed {
            log_path: log.path.clone(),
            turns: log.turns.len(),
            cursor: log.cursor.to_string(),
        });
        info!(
            session_id = %log.header.session_id,
            turns = log.turns.len(),
            cursor = %log.cursor,
            "Session resumed"
        );

        let rounds = log
            .turns
            .last()
            .filter(|t| !t.is_complete())
            .map(|t| t.rounds.len())
            .unwrap_or(0);
        let mut session = Self::assemble(
            log.header.session_id,
            writer,
            log.turns,
            SessionState::Resuming(log.cursor),
            sandbox,
            log.compactions.len(),
            parts,
        );
        session.rounds_this_turn = rounds;
        Ok(session)
    }

    fn assemble(
        id: String,
        writer: LogWriter,
        turns: Vec<Turn>,
        state: SessionState,
        sandbox: SandboxState,
        compactions: usize,
        parts: SessionParts,
    ) -> Self {
        Self {
            id,
            writer,
            turns,
            state,
            sandbox,
            compactions,
            rounds_this_turn: 0,
            provider: parts.provider,
            tools: parts.tools,
            console: parts.console,
            compactor: parts.compactor,
            interrupt: parts.interrupt,
            options: parts.options,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn log_path(&self) -> &Path {
        self.writer.path()
    }

    fn completed_turns(&self) -> usize {
        self.turns.iter().filter(|t| t.is_complete()).count()
    }

    /// Drive the machine until the user exits. Returns the log path, or `None`
    /// if the log was removed because nothing was recorded in it.
    pub async fn run(mut self) -> Result<Option<PathBuf>, SessionError> {
        while self.state != SessionState::Terminated {
            if let Err(e) = self.step().await {
                error!(session_id = %self.id, error = %e, "Session aborted");
                return Err(e);
            }
        }
        Ok(self.finish())
    }

    /// Perform one transition and return the new state.
    pub async fn step(&mut self) -> Result<&SessionState, SessionError> {
        let next = match std::mem::replace(&mut self.state, SessionState::Terminated) {
            SessionState::Resuming(cursor) => self.resolve_cursor(cursor)?,
            SessionState::AwaitingInput => self.await_input().await?,
            SessionState::RequestingModel => self.request_model().await?,
            SessionState::ExecutingTools => self.execute_tools().await?,
            SessionState::Terminated => SessionState::Terminated,
        };
        debug!(session_id = %self.id, state = %next, "Session transition");
        self.state = next;
        Ok(&self.state)
    }

    fn resolve_cursor(&mut self, cursor: ResumeCursor) -> Result<SessionState, SessionError> {
        Ok(match cursor {
            ResumeCursor::Idle => SessionState::AwaitingInput,
            ResumeCursor::AwaitingModel { .. } => SessionState::RequestingModel,
            ResumeCursor::AwaitingToolResults { .. } => SessionState::ExecutingTools,
            ResumeCursor::AwaitingTurnEnd { turn } => {
                // The final answer is durable; only its end marker is missing.
                info!(session_id = %self.id, turn, "Closing turn left open by a crash");
                self.end_turn(TurnOutcome::Completed)?;
                SessionState::AwaitingInput
            }
        })
    }

    fn write(&mut self, block: &Block) -> Result<u64, SessionError> {
        self.writer
            .write_block(block)
            .map_err(|source| SessionError::LogWrite {
                log_path: self.writer.path().to_path_buf(),
                source,
            })
    }

    fn open_turn(&mut self) -> Result<&mut Turn, SessionError> {
        self.turns
            .last_mut()
            .filter(|t| !t.is_complete())
            .ok_or_else(|| SessionError::Other(anyhow::anyhow!("No open turn")))
    }

    fn end_turn(&mut self, outcome: TurnOutcome) -> Result<(), SessionError> {
        self.write(&Block::EndTurn {
            outcome: outcome.clone(),
        })?;
        let turn = self.open_turn()?;
        info!(turn = turn.index, outcome = ?outcome, "Turn ended");
        turn.finish(outcome);
        Ok(())
    }

    async fn await_input(&mut self) -> Result<SessionState, SessionError> {
        let console = Arc::clone(&self.console);
        let input = tokio::select! {
            input = console.read_input() => input,
            _ = self.interrupt.wait() => Ok(None),
        };
        let text = match input {
            Ok(Some(text)) => text,
            Ok(None) => return Ok(SessionState::Terminated),
            Err(e) => {
                warn!(error = %e, "Failed to read input");
                self.console
                    .show(SessionEvent::Warning(format!("Input closed: {e}")));
                return Ok(SessionState::Terminated);
            }
        };

        let text = text.trim();
        if text.is_empty() {
            return Ok(SessionState::AwaitingInput);
        }
        if is_exit_command(text) {
            return Ok(SessionState::Terminated);
        }

        self.write(&Block::User {
            text: text.to_string(),
        })?;
        let index = self.turns.len() + 1;
        self.turns.push(Turn::new(index, text));
        self.rounds_this_turn = 0;
        self.interrupt.reset();
        info!(session_id = %self.id, turn = index, "Turn started");
        Ok(SessionState::RequestingModel)
    }

    /// Compact before a model request if needed. Returns `false` if interrupted.
    async fn compact_if_needed(&mut self) -> Result<bool, SessionError> {
        if !self.compactor.needs_compaction(&self.turns) {
            return Ok(true);
        }
        self.console.waiting(Some("Compacting conversation..."));
        let outcome = tokio::select! {
            r = self.compactor.maybe_compact(&self.turns, self.provider.as_ref(), &self.options.retry) => r,
            _ = self.interrupt.wait() => Err(ProviderError::Interrupted),
        };
        self.console.waiting(None);

        let event = match outcome {
            Ok(Some(event)) => event,
            Ok(None) => return Ok(true),
            Err(ProviderError::Interrupted) => return Ok(false),
            Err(e) => {
                // The request proceeds uncompacted and may still fit.
                warn!(error = %e, "Compaction failed");
                self.console
                    .show(SessionEvent::Warning(format!("Compaction failed: {e}")));
                return Ok(true);
            }
        };

        self.write(&Block::CompactionEvent(event.clone()))?;
        apply_compaction(&mut self.turns, &event)
            .map_err(|e| SessionError::Other(anyhow::Error::new(e)))?;
        self.compactions += 1;
        info!(
            first_turn = event.first_turn,
            last_turn = event.last_turn,
            before = event.estimated_before,
            after = event.estimated_after,
            "Conversation compacted"
        );
        self.console.show(SessionEvent::Compacted {
            first_turn: event.first_turn,
            last_turn: event.last_turn,
            estimated_before: event.estimated_before,
            estimated_after: event.estimated_after,
        });
        Ok(true)
    }

    async fn request_model(&mut self) -> Result<SessionState, SessionError> {
        if self.rounds_this_turn >= self.options.max_rounds_per_turn {
            warn!(rounds = self.rounds_this_turn, "Round limit reached");
            self.console
                .show(SessionEvent::TurnFailed(ROUND_LIMIT_ERROR.to_string()));
            self.end_turn(TurnOutcome::Failed {
                error: ROUND_LIMIT_ERROR.to_string(),
            })?;
            return Ok(SessionState::AwaitingInput);
        }

        if !self.compact_if_needed().await? {
            return self.interrupt_turn();
        }

        let request = CompletionRequest {
            system: self.options.system_prompt.clone(),
            messages: render_turns(&self.turns),
            tools: self.tools.definitions(),
            max_tokens: self.options.max_tokens,
        };

        self.console.waiting(Some("Thinking..."));
        let response = tokio::select! {
            r = complete_with_retry(self.provider.as_ref(), &request, &self.options.retry) => r,
            _ = self.interrupt.wait() => Err(ProviderError::Interrupted),
        };
        self.console.waiting(None);

        let payload = match response {
            Ok(payload) => payload,
            Err(ProviderError::Interrupted) => return self.interrupt_turn(),
            Err(e) => {
                error!(session_id = %self.id, error = %e, "Model request failed");
                self.console.show(SessionEvent::TurnFailed(e.to_string()));
                self.end_turn(TurnOutcome::Failed {
                    error: e.to_string(),
                })?;
                return Ok(SessionState::AwaitingInput);
            }
        };

        self.record_response(payload)
    }

    fn record_response(&mut self, payload: AssistantPayload) -> Result<SessionState, SessionError> {
        self.write(&Block::Assistant(payload.clone()))?;
        self.rounds_this_turn += 1;

        let text = payload.joined_text();
        if !text.trim().is_empty() {
            self.console.show(SessionEvent::AssistantText(text));
        }
        let has_calls = payload.has_tool_calls();
        self.open_turn()?.push_response(payload);

        if has_calls {
            Ok(SessionState::ExecutingTools)
        } else {
            self.end_turn(TurnOutcome::Completed)?;
            Ok(SessionState::AwaitingInput)
        }
    }

    fn interrupt_turn(&mut self) -> Result<SessionState, SessionError> {
        info!(session_id = %self.id, "Turn interrupted");
        self.console.show(SessionEvent::TurnInterrupted);
        self.end_turn(TurnOutcome::Interrupted)?;
        self.interrupt.reset();
        Ok(SessionState::AwaitingInput)
    }

    async fn execute_tools(&mut self) -> Result<SessionState, SessionError> {
        let calls = pending_calls(&self.turns);
        if calls.is_empty() {
            return Ok(SessionState::RequestingModel);
        }

        let mut slots: Vec<Option<ToolResult>> = vec![None; calls.len()];
        let mut approved = Vec::with_capacity(calls.len());
        let mut interrupted = false;

        // Confirmations are asked one at a time, in issue order.
        for (idx, call) in calls.iter().enumerate() {
            self.console.show(SessionEvent::ToolCall {
                call_id: call.id.clone(),
                description: call.describe(),
            });
            if interrupted {
                continue;
            }
            let Some(prompt) = self.tools.confirmation_prompt(call) else {
                approved.push(idx);
                continue;
            };
            if self.options.auto_approve {
                debug!(call_id = %call.id, "Guarded call auto-approved");
                approved.push(idx);
                continue;
            }
            let console = Arc::clone(&self.console);
            let answer = tokio::select! {
                answer = console.confirm(&prompt) => answer,
                _ = self.interrupt.wait() => {
                    interrupted = true;
                    Ok(false)
                }
            };
            match answer {
                Ok(true) => approved.push(idx),
                Ok(false) if interrupted => {}
                Ok(false) => {
                    info!(call_id = %call.id, "User declined tool call");
                    slots[idx] = Some(ToolResult::refused(&call.id, DECLINED_OUTPUT));
                }
                Err(e) => {
                    warn!(call_id = %call.id, error = %e, "Confirmation failed, treating as declined");
                    slots[idx] = Some(ToolResult::refused(&call.id, DECLINED_OUTPUT));
                }
            }
        }

        if !interrupted {
            interrupted = self.dispatch(&calls, &approved, &mut slots).await;
        }

        let results: Vec<ToolResult> = calls
            .iter()
            .zip(slots)
            .map(|(call, slot)| match slot {
                Some(result) => ToolResult {
                    call_id: call.id.clone(),
                    ..result
                },
                None => ToolResult::interrupted(&call.id),
            })
            .collect();

        let sandbox = self.tools.sandbox_state();
        if sandbox != self.sandbox {
            self.write(&Block::Sandbox(sandbox.clone()))?;
            info!(container = ?sandbox.container_id, mounts = sandbox.mounts.len(), "Sandbox state recorded");
            self.sandbox = sandbox;
        }

        self.write(&Block::ToolResult {
            results: results.clone(),
        })?;
        for result in &results {
            self.console.show(SessionEvent::ToolResult {
                call_id: result.call_id.clone(),
                status: result.status,
                output: result.output.clone(),
            });
        }
        let stray = self.open_turn()?.record_results(results);
        debug_assert!(stray.is_empty());

        if interrupted {
            return self.interrupt_turn();
        }
        Ok(SessionState::RequestingModel)
    }

    /// Run approved calls concurrently. Returns `true` if interrupted first.
    async fn dispatch(
        &self,
        calls: &[ToolCall],
        approved: &[usize],
        slots: &mut [Option<ToolResult>],
    ) -> bool {
        let mut running = approved
            .iter()
            .map(|&idx| {
                let tools = Arc::clone(&self.tools);
                let call = calls[idx].clone();
                async move { (idx, tools.execute(&call).await) }
            })
            .collect::<FuturesUnordered<_>>();

        loop {
            tokio::select! {
                next = running.next() => match next {
                    Some((idx, result)) => slots[idx] = Some(result),
                    None => return false,
                },
                _ = self.interrupt.wait() => {
                    warn!(
                        unfinished = running.len(),
                        "Interrupted during tool execution"
                    );
                    return true;
                }
            }
        }
    }

    /// Release the log; remove it if it recorded nothing worth resuming.
    fn finish(self) -> Option<PathBuf> {
        let path = self.writer.path().to_path_buf();
        let empty = self.completed_turns() == 0 && self.compactions == 0;
        drop(self.writer);
        if empty {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    info!(log = %path.display(), "Removed empty session log");
                    return None;
                }
                Err(e) => warn!(log = %path.display(), error = %e, "Failed to remove empty session log"),
            }
        }
        info!(log = %path.display(), "Session ended");
        Some(path)
    }
}

/// `exit` or `quit` in any letter case ends the session.
fn is_exit_command(text: &str) -> bool {
    text.eq_ignore_ascii_case("exit") || text.eq_ignore_ascii_case("quit")
}
