//! Applying a compaction event to a turn history.
//!
//! Both the live session and log replay go through `apply_compaction`, so the
//! spliced history is identical whichever path produced it.

use crate::conversation::Turn;
use crate::errors::CompactionError;
use crate::log::CompactionEvent;

/// Replace turns `first_turn..=last_turn` with one summary turn and renumber.
///
/// The range must be non-empty, must not include the most recent turn, and may only
/// cover completed turns.
pub fn apply_compaction(turns: &mut Vec<Turn>, event: &CompactionEvent) -> Result<(), CompactionError> {
    let (first, last, len) = (event.first_turn, event.last_turn, turns.len());
    if first == 0 || first > last || last >= len {
        return Err(CompactionError::InvalidRange { first, last, len });
    }
    if let Some(open) = turns[first - 1..last].iter().find(|t| !t.is_complete()) {
        return Err(CompactionError::IncompleteTurn { turn: open.index });
    }

    let summary = Turn::summary(first, first, last, &event.summary);
    turns.splice(first - 1..last, std::iter::once(summary));
    for (i, turn) in turns.iter_mut().enumerate() {
        turn.index = i + 1;
    }
    Ok(())
}
