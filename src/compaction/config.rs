//! Context budget configuration.

use anyhow::{Context, Result};

use super::{COMPACTION_SAFETY_MARGIN, DEFAULT_MODEL_WINDOW_TOKENS, DEFAULT_SUMMARY_MAX_TOKENS};

/// Represents a context limit configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextLimit {
    /// Percentage of model window (e.g., 80%)
    Percentage(f32),
    /// Absolute token count
    Absolute(usize),
}

impl ContextLimit {
    /// Calculate the effective token budget based on the model window size.
    pub fn effective_limit(&self, model_window_tokens: usize) -> usize {
        match self {
            ContextLimit::Percentage(pct) => {
                ((model_window_tokens as f32) * (*pct / 100.0)) as usize
            }
            ContextLimit::Absolute(tokens) => *tokens,
        }
    }

    /// Check if this limit is a percentage.
    pub fn is_percentage(&self) -> bool {
        matches!(self, ContextLimit::Percentage(_))
    }
}

impl Default for ContextLimit {
    fn default() -> Self {
        ContextLimit::Percentage(80.0)
    }
}

impl std::fmt::Display for ContextLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextLimit::Percentage(pct) => write!(f, "{}%", pct),
            ContextLimit::Absolute(tokens) => write!(f, "{}", tokens),
        }
    }
}

/// Parse a context limit string into a ContextLimit.
///
/// Accepts:
/// - Percentage format: "80%", "60%", etc.
/// - Absolute format: "50000", "100000", etc. (tokens)
pub fn parse_context_limit(s: &str) -> Result<ContextLimit> {
    let s = s.trim();

    if s.is_empty() {
        anyhow::bail!("Context limit cannot be empty");
    }

    if let Some(num_str) = s.strip_suffix('%') {
        let pct: f32 = num_str
            .parse()
            .with_context(|| format!("Invalid percentage in context limit: {}", s))?;

        if pct <= 0.0 || pct > 100.0 {
            anyhow::bail!(
                "Context limit percentage must be between 0 and 100, got {}",
                pct
            );
        }

        Ok(ContextLimit::Percentage(pct))
    } else {
        let tokens: usize = s
            .parse()
            .with_context(|| format!("Invalid absolute context limit: {}", s))?;

        if tokens == 0 {
            anyhow::bail!("Context limit cannot be zero");
        }

        Ok(ContextLimit::Absolute(tokens))
    }
}

/// Resolved compaction settings for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionConfig {
    pub limit: ContextLimit,
    pub window_tokens: usize,
    /// Percentage below the budget that a compaction aims for.
    pub margin_percent: f32,
    /// Upper bound on the size of a generated summary.
    pub summary_max_tokens: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            limit: ContextLimit::default(),
            window_tokens: DEFAULT_MODEL_WINDOW_TOKENS,
            margin_percent: COMPACTION_SAFETY_MARGIN,
            summary_max_tokens: DEFAULT_SUMMARY_MAX_TOKENS,
        }
    }
}

impl CompactionConfig {
    /// Estimated request size above which compaction fires.
    pub fn budget(&self) -> usize {
        self.limit.effective_limit(self.window_tokens)
    }

    /// Size a compaction tries to get under.
    pub fn target(&self) -> usize {
        let budget = self.budget();
        let margin = (budget as f32 * (self.margin_percent / 100.0)) as usize;
        budget.saturating_sub(margin)
    }
}
