//! Second pass over a session log: records to turns, then a resume cursor.
//!
//! `replay` is a pure function of the records. It applies each block to the
//! accumulated turns exactly as the live session did, including compaction splices.
//! A block that does not fit the grammar (results with no open round, a user message
//! while a turn is still open, ...) ends the trusted prefix the same way a torn line
//! does. `classify_tail` then inspects only the last turn to decide how to resume.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::reader::{Truncation, read_log};
use super::schema::{Block, CompactionEvent, LogRecord, SandboxState, SessionHeader};
use crate::compaction::apply_compaction;
use crate::conversation::{ToolCall, Turn};
use crate::errors::LogError;

/// Where an interrupted session picks up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeCursor {
    /// Nothing pending; wait for user input.
    Idle,
    /// The turn's last step is durable user input or a complete round; ask the model.
    AwaitingModel { turn: usize },
    /// The last assistant response requested tools that have not all answered.
    AwaitingToolResults {
        turn: usize,
        pending: Vec<String>,
        answered: Vec<String>,
    },
    /// The final assistant message is durable but the turn-end marker is not.
    AwaitingTurnEnd { turn: usize },
}

impl ResumeCursor {
    pub fn is_idle(&self) -> bool {
        matches!(self, ResumeCursor::Idle)
    }
}

impl std::fmt::Display for ResumeCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResumeCursor::Idle => write!(f, "idle"),
            ResumeCursor::AwaitingModel { turn } => {
                write!(f, "turn {turn} awaiting model response")
            }
            ResumeCursor::AwaitingToolResults { turn, pending, .. } => {
                write!(f, "turn {turn} awaiting {} tool result(s)", pending.len())
            }
            ResumeCursor::AwaitingTurnEnd { turn } => {
                write!(f, "turn {turn} awaiting end marker")
            }
        }
    }
}

/// In-memory state rebuilt from log records.
#[derive(Debug, Clone, Default)]
pub struct Replayed {
    pub turns: Vec<Turn>,
    pub sandbox: Option<SandboxState>,
    pub compactions: Vec<CompactionEvent>,
    /// Number of leading records applied.
    pub consumed: usize,
    /// First record that did not fit the block grammar.
    pub violation: Option<Truncation>,
    pub warnings: Vec<String>,
}

pub fn replay(records: &[LogRecord]) -> Replayed {
    let mut state = Replayed::default();

    for (idx, record) in records.iter().enumerate() {
        if let Err(reason) = apply_block(&mut state, &record.block) {
            warn!(seq = record.seq, %reason, "Stopping replay at out-of-grammar block");
            state.violation = Some(Truncation {
                line: idx + 1,
                reason,
            });
            break;
        }
        state.consumed = idx + 1;
    }

    debug!(
        turns = state.turns.len(),
        consumed = state.consumed,
        "Replayed session log"
    );
    state
}

fn apply_block(state: &mut Replayed, block: &Block) -> Result<(), String> {
    let open_turn = state.turns.last().filter(|t| !t.is_complete()).map(|t| t.index);

    match block {
        Block::Session(_) => {
            if state.consumed != 0 {
                return Err("SESSION header after the first block".to_string());
            }
        }
        Block::User { text } => {
            if let Some(turn) = open_turn {
                return Err(format!("USER block while turn {turn} is still open"));
            }
            let index = state.turns.len() + 1;
            state.turns.push(Turn::new(index, text.clone()));
        }
        Block::Assistant(payload) => {
            let turn = open_turn_mut(state, "ASSISTANT")?;
            if turn.final_message.is_some() {
                return Err(format!(
                    "ASSISTANT block after the final message of turn {}",
                    turn.index
                ));
            }
            if turn.open_round().is_some() {
                return Err(format!(
                    "ASSISTANT block while turn {} still awaits tool results",
                    turn.index
                ));
            }
            turn.push_response(payload.clone());
        }
        Block::ToolResult { results } => {
            let turn = open_turn_mut(state, "TOOL_RESULT")?;
            if turn.rounds.is_empty() || turn.final_message.is_some() {
                return Err(format!(
                    "TOOL_RESULT block with no tool round in turn {}",
                    turn.index
                ));
            }
            let index = turn.index;
            let stray = turn.record_results(results.clone());
            for result in stray {
                state.warnings.push(format!(
                    "Ignored result for unknown call id '{}' in turn {index}",
                    result.call_id
                ));
            }
        }
        Block::EndTurn { outcome } => {
            let turn = open_turn_mut(state, "END_TURN")?;
            turn.finish(outcome.clone());
        }
        Block::CompactionEvent(event) => {
            apply_compaction(&mut state.turns, event).map_err(|e| e.to_string())?;
            state.compactions.push(event.clone());
        }
        Block::Sandbox(sandbox) => {
            state.sandbox = Some(sandbox.clone());
        }
    }
    Ok(())
}

fn open_turn_mut<'a>(state: &'a mut Replayed, kind: &str) -> Result<&'a mut Turn, String> {
    state
        .turns
        .last_mut()
        .filter(|t| !t.is_complete())
        .ok_or_else(|| format!("{kind} block with no open turn"))
}

/// Classify the trailing turn into a resume cursor.
pub fn classify_tail(turns: &[Turn]) -> ResumeCursor {
    let Some(turn) = turns.last().filter(|t| !t.is_complete()) else {
        return ResumeCursor::Idle;
    };

    if turn.final_message.is_some() {
        return ResumeCursor::AwaitingTurnEnd { turn: turn.index };
    }

    match turn.open_round() {
        Some(round) => ResumeCursor::AwaitingToolResults {
            turn: turn.index,
            pending: round.pending_ids(),
            answered: round.answered_ids(),
        },
        None => ResumeCursor::AwaitingModel { turn: turn.index },
    }
}

/// Calls from the last assistant response that still need a result.
pub fn pending_calls(turns: &[Turn]) -> Vec<ToolCall> {
    turns
        .last()
        .filter(|t| !t.is_complete())
        .and_then(|t| t.open_round())
        .map(|round| round.pending_calls())
        .unwrap_or_default()
}

/// Everything recovered from a log file.
#[derive(Debug, Clone)]
pub struct SessionLog {
    pub path: PathBuf,
    pub header: SessionHeader,
    pub turns: Vec<Turn>,
    pub cursor: ResumeCursor,
    pub sandbox: Option<SandboxState>,
    pub compactions: Vec<CompactionEvent>,
    pub truncation: Option<Truncation>,
    pub warnings: Vec<String>,
    /// Byte length of the applied prefix; a resumed writer appends from here.
    pub trusted_len: u64,
    pub next_seq: u64,
}

impl SessionLog {
    pub fn completed_turns(&self) -> usize {
        self.turns.iter().filter(|t| t.is_complete()).count()
    }
}

/// Read and replay a session log.
pub fn load(path: &Path) -> Result<SessionLog, LogError> {
    let raw = read_log(path)?;
    let replayed = replay(&raw.records);

    let header = match raw.records.first().map(|r| &r.block) {
        Some(Block::Session(header)) if replayed.consumed > 0 => header.clone(),
        _ => {
            return Err(LogError::MissingHeader {
                path: path.to_path_buf(),
            });
        }
    };

    let cursor = classify_tail(&replayed.turns);
    let trusted_len = raw.prefix_len(replayed.consumed);
    Ok(SessionLog {
        path: path.to_path_buf(),
        header,
        cursor,
        sandbox: replayed.sandbox,
        compactions: replayed.compactions,
        truncation: replayed.violation.or(raw.truncation),
        warnings: replayed.warnings,
        trusted_len,
        next_seq: replayed.consumed as u64 + 1,
        turns: replayed.turns,
    })
}
