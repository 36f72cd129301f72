//! Tolerant first pass over a session log: bytes to ordered records.
//!
//! Only complete, newline-terminated lines that decode and continue the sequence are
//! trusted. The first line that fails any of those checks ends the trusted prefix;
//! it and everything after it are treated as absent.

use std::path::Path;

use super::schema::{Block, LogRecord};
use crate::errors::LogError;

/// Why the trusted prefix of a log ended before end-of-file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncation {
    /// 1-based line number of the first untrusted line.
    pub line: usize,
    pub reason: String,
}

impl std::fmt::Display for Truncation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.reason)
    }
}

/// Records recovered from a log file.
#[derive(Debug, Clone, Default)]
pub struct RawLog {
    pub records: Vec<LogRecord>,
    /// Byte offset just past each record's newline, parallel to `records`.
    pub line_ends: Vec<u64>,
    pub truncation: Option<Truncation>,
}

impl RawLog {
    /// Byte length of the first `count` records.
    pub fn prefix_len(&self, count: usize) -> u64 {
        match count {
            0 => 0,
            n => self.line_ends[n.min(self.line_ends.len()) - 1],
        }
    }
}

pub fn read_log(path: &Path) -> Result<RawLog, LogError> {
    let bytes = std::fs::read(path).map_err(|source| LogError::io("read", path, source))?;
    Ok(parse_log(&bytes))
}

/// Decode the trusted prefix of a log.
pub fn parse_log(bytes: &[u8]) -> RawLog {
    let mut raw = RawLog::default();
    let mut offset = 0usize;
    let mut line_no = 0usize;

    while offset < bytes.len() {
        line_no += 1;
        let rest = &bytes[offset..];
        let Some(newline) = rest.iter().position(|b| *b == b'\n') else {
            raw.truncation = Some(Truncation {
                line: line_no,
                reason: "unterminated final line (incomplete write)".to_string(),
            });
            break;
        };
        let line = &rest[..newline];
        let end = offset + newline + 1;

        let record = match serde_json::from_slice::<LogRecord>(line) {
            Ok(record) => record,
            Err(e) => {
                raw.truncation = Some(Truncation {
                    line: line_no,
                    reason: format!("undecodable block: {e}"),
                });
                break;
            }
        };

        let expected_seq = raw.records.len() as u64 + 1;
        if record.seq != expected_seq {
            raw.truncation = Some(Truncation {
                line: line_no,
                reason: format!("sequence gap: expected {expected_seq}, found {}", record.seq),
            });
            break;
        }
        let is_header = matches!(record.block, Block::Session(_));
        if is_header != (expected_seq == 1) {
            raw.truncation = Some(Truncation {
                line: line_no,
                reason: if is_header {
                    "SESSION header after the first line".to_string()
                } else {
                    "first block is not a SESSION header".to_string()
                },
            });
            break;
        }

        raw.records.push(record);
        raw.line_ends.push(end as u64);
        offset = end;
    }

    raw
}
