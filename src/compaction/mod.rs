//! Automatic context compaction.
//!
//! Before every model request the session asks the [`Compactor`] whether the
//! estimated request size exceeds the budget. If it does, the oldest turns are
//! summarized by the model and replaced with a single synthetic turn. The
//! resulting [`CompactionEvent`](crate::log::CompactionEvent) is written to the
//! log before the shortened history is used.
//!
//! The budget is configured in `.ntn/config.toml`:
//!
//! ```toml
//! [context]
//! limit = "80%"            # of window_tokens, or an absolute token count
//! window_tokens = 200000
//! margin_percent = 10.0    # compaction aims this far below the budget
//! summary_max_tokens = 2000
//! ```

mod compactor;
mod config;
mod estimator;
mod splice;
mod summary;

pub use compactor::{CompactionPlan, Compactor};
pub use config::{CompactionConfig, ContextLimit, parse_context_limit};
pub use estimator::{BYTES_PER_TOKEN, DEFAULT_MESSAGE_OVERHEAD, TokenEstimator, text_tokens};
pub use splice::apply_compaction;
pub use summary::{SUMMARY_SYSTEM_PROMPT, render_transcript, summary_request_text, truncate_summary};

/// Default model context window in tokens.
pub const DEFAULT_MODEL_WINDOW_TOKENS: usize = 200_000;

/// Percentage below the budget that a compaction aims for, so the next few
/// requests do not immediately trigger another one.
pub const COMPACTION_SAFETY_MARGIN: f32 = 10.0;

/// Upper bound on a generated summary, in estimated tokens.
pub const DEFAULT_SUMMARY_MAX_TOKENS: usize = 2000;
