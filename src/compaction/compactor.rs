//! Deciding when to compact, choosing the range, and producing the summary.

use tracing::{debug, info, warn};

use super::config::CompactionConfig;
use super::estimator::{BYTES_PER_TOKEN, TokenEstimator};
use super::splice::apply_compaction;
use super::summary::{
    SUMMARY_SYSTEM_PROMPT, render_transcript, summary_request_text, truncate_summary,
};
use crate::conversation::Turn;
use crate::errors::ProviderError;
use crate::log::CompactionEvent;
use crate::provider::{CompletionRequest, LlmProvider, Message, RetryPolicy, complete_with_retry};

/// Turns selected for compaction, 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionPlan {
    pub first_turn: usize,
    pub last_turn: usize,
    pub estimated_before: usize,
}

pub struct Compactor {
    config: CompactionConfig,
    estimator: TokenEstimator,
}

impl Compactor {
    pub fn new(config: CompactionConfig, estimator: TokenEstimator) -> Self {
        Self { config, estimator }
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    pub fn budget(&self) -> usize {
        self.config.budget()
    }

    pub fn needs_compaction(&self, turns: &[Turn]) -> bool {
        self.estimator.estimate(turns) > self.budget()
    }

    /// Largest size a summary turn can reach once spliced in.
    fn summary_reserve(&self) -> usize {
        let placeholder = "x".repeat(self.config.summary_max_tokens * BYTES_PER_TOKEN);
        self.estimator
            .turn_tokens(&Turn::summary(1, 1, 1, &placeholder))
    }

    /// Pick the shortest prefix whose replacement by a summary brings the
    /// estimate under the target. The most recent turn is never included.
    ///
    /// Returns `None` when under budget, when only one turn exists, or when the only
    /// turn before the latest is already a summary.
    pub fn plan(&self, turns: &[Turn]) -> Option<CompactionPlan> {
        let estimated_before = self.estimator.estimate(turns);
        let budget = self.budget();
        if estimated_before <= budget {
            return None;
        }
        if turns.len() <= 1 {
            warn!(
                estimated = estimated_before,
                budget, "Single turn exceeds the context budget, not compacting"
            );
            return None;
        }

        let target = self.config.target();
        let reserve = self.summary_reserve();
        let last = turns.len() - 1;
        let count = (1..last)
            .find(|&k| self.estimator.estimate(&turns[k..]) + reserve <= target)
            .unwrap_or(last);

        // Interrupted or failed turns are complete; only a still-open turn blocks the range.
        let count = turns[..count]
            .iter()
            .position(|t| !t.is_complete())
            .unwrap_or(count);
        if count == 0 {
            return None;
        }
        // Re-summarizing a lone summary turn frees nothing.
        if count == 1 && turns[0].is_summary() {
            warn!(
                estimated = estimated_before,
                budget, "Only a summary precedes the oversized latest turn, not compacting"
            );
            return None;
        }

        debug!(
            estimated_before,
            budget, target, reserve, count, "Planned compaction"
        );
        Some(CompactionPlan {
            first_turn: 1,
            last_turn: count,
            estimated_before,
        })
    }

    /// Summarize the planned prefix through `provider`.
    ///
    /// The event is returned unapplied: the caller persists it, then splices it
    /// into the live history with [`apply_compaction`].
    pub async fn maybe_compact(
        &self,
        turns: &[Turn],
        provider: &dyn LlmProvider,
        retry: &RetryPolicy,
    ) -> Result<Option<CompactionEvent>, ProviderError> {
        let Some(plan) = self.plan(turns) else {
            return Ok(None);
        };
        let removed = &turns[plan.first_turn - 1..plan.last_turn];

        info!(
            first_turn = plan.first_turn,
            last_turn = plan.last_turn,
            estimated = plan.estimated_before,
            budget = self.budget(),
            "Compacting conversation"
        );

        let request = CompletionRequest {
            system: SUMMARY_SYSTEM_PROMPT.to_string(),
            messages: vec![Message::user_text(summary_request_text(removed))],
            tools: Vec::new(),
            max_tokens: self.config.summary_max_tokens as u32,
        };
        let response = complete_with_retry(provider, &request, retry).await?;

        let mut summary = truncate_summary(&response.joined_text(), self.config.summary_max_tokens);
        if summary.is_empty() {
            warn!("Summarizer returned no text, keeping a clipped transcript instead");
            summary = truncate_summary(&render_transcript(removed), self.config.summary_max_tokens);
        }

        let mut event = CompactionEvent {
            reason: format!(
                "estimated {} tokens exceeds budget of {}",
                plan.estimated_before,
                self.budget()
            ),
            first_turn: plan.first_turn,
            last_turn: plan.last_turn,
            summary,
            estimated_before: plan.estimated_before,
            estimated_after: 0,
        };

        let mut after = turns.to_vec();
        if let Err(e) = apply_compaction(&mut after, &event) {
            return Err(ProviderError::Fatal {
                status: None,
                message: format!("Compaction plan could not be applied: {e}"),
            });
        }
        event.estimated_after = self.estimator.estimate(&after);
        Ok(Some(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compaction::ContextLimit;
    use crate::conversation::{AssistantPayload, TurnOutcome};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Summarizer {
        reply: String,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl Summarizer {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for Summarizer {
        async fn complete(
            &self,
            request: &CompletionRequest,
        ) -> Result<AssistantPayload, ProviderError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(AssistantPayload::text(self.reply.clone()))
        }

        fn model(&self) -> &str {
            "summarizer"
        }
    }

    /// A completed turn costing exactly `tokens` with a zero-overhead estimator.
    fn turn(index: usize, tokens: usize) -> Turn {
        let mut t = Turn::new(index, "u".repeat(tokens * BYTES_PER_TOKEN - 3));
        t.push_response(AssistantPayload::text("abc"));
        t.finish(TurnOutcome::Completed);
        t
    }

    fn compactor(budget: usize) -> Compactor {
        Compactor::new(
            CompactionConfig {
                limit: ContextLimit::Absolute(budget),
                window_tokens: 200_000,
                margin_percent: 10.0,
                summary_max_tokens: 100,
            },
            TokenEstimator::new(0, 0),
        )
    }

    #[test]
    fn test_under_budget_is_noop() {
        let c = compactor(1000);
        let turns: Vec<Turn> = (1..=3).map(|i| turn(i, 300)).collect();
        assert!(!c.needs_compaction(&turns));
        assert_eq!(c.plan(&turns), None);
    }

    #[test]
    fn test_plan_keeps_latest_turn() {
        let c = compactor(1000);
        let turns: Vec<Turn> = (1..=5).map(|i| turn(i, 300)).collect();
        assert_eq!(c.estimator().estimate(&turns), 1500);

        let plan = c.plan(&turns).unwrap();
        assert_eq!(plan.first_turn, 1);
        assert!(plan.last_turn >= 2);
        assert!(plan.last_turn < turns.len());
        assert_eq!(plan.estimated_before, 1500);
    }

    #[test]
    fn test_single_oversized_turn_is_not_compacted() {
        let c = compactor(100);
        assert_eq!(c.plan(&[turn(1, 500)]), None);
    }

    #[test]
    fn test_summary_before_oversized_turn_is_not_compacted() {
        let c = compactor(1000);
        let turns = vec![Turn::summary(1, 1, 4, "earlier work"), turn(2, 2000)];
        assert!(c.needs_compaction(&turns));
        assert_eq!(c.plan(&turns), None);
    }

    #[tokio::test]
    async fn test_summary_before_oversized_turn_makes_no_request() {
        let c = compactor(1000);
        let turns = vec![Turn::summary(1, 1, 4, "earlier work"), turn(2, 2000)];
        let provider = Summarizer::new("unused");
        let event = c
            .maybe_compact(&turns, &provider, &RetryPolicy::default())
            .await
            .unwrap();
        assert!(event.is_none());
        assert!(provider.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn test_summary_and_small_turn_are_compacted_together() {
        let c = compactor(1000);
        let turns = vec![
            Turn::summary(1, 1, 4, "earlier work"),
            turn(2, 300),
            turn(3, 950),
        ];
        let plan = c.plan(&turns).unwrap();
        assert_eq!((plan.first_turn, plan.last_turn), (1, 2));
    }

    #[test]
    fn test_falls_back_to_all_but_latest() {
        let c = compactor(1000);
        let turns = vec![turn(1, 300), turn(2, 300), turn(3, 950)];
        let plan = c.plan(&turns).unwrap();
        assert_eq!((plan.first_turn, plan.last_turn), (1, 2));
    }

    #[test]
    fn test_open_turn_stops_the_range() {
        let c = compactor(1000);
        let mut turns: Vec<Turn> = (1..=5).map(|i| turn(i, 300)).collect();
        turns[1].outcome = None;
        let plan = c.plan(&turns).unwrap();
        assert_eq!(plan.last_turn, 1);
    }

    #[tokio::test]
    async fn test_maybe_compact_summarizes_prefix() {
        let c = compactor(1000);
        let turns: Vec<Turn> = (1..=5).map(|i| turn(i, 300)).collect();
        let provider = Summarizer::new("Worked on the parser; next: tests.");

        let event = c
            .maybe_compact(&turns, &provider, &RetryPolicy::default())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(event.first_turn, 1);
        assert_eq!(event.summary, "Worked on the parser; next: tests.");
        assert!(event.estimated_after < 1000);
        assert!(event.estimated_after < event.estimated_before);

        let mut compacted = turns.clone();
        apply_compaction(&mut compacted, &event).unwrap();
        let latest = compacted.last().unwrap();
        assert_eq!(latest.user_message, turns[4].user_message);

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].tools.is_empty());
        assert_eq!(requests[0].system, SUMMARY_SYSTEM_PROMPT);
    }

    #[tokio::test]
    async fn test_empty_summary_falls_back_to_transcript() {
        let c = compactor(1000);
        let turns: Vec<Turn> = (1..=5).map(|i| turn(i, 300)).collect();
        let provider = Summarizer::new("   ");
        let event = c
            .maybe_compact(&turns, &provider, &RetryPolicy::default())
            .await
            .unwrap()
            .unwrap();
        assert!(event.summary.starts_with("## Turn 1"));
        assert!(event.summary.len() <= 100 * BYTES_PER_TOKEN);
    }

    #[tokio::test]
    async fn test_under_budget_makes_no_request() {
        let c = compactor(1000);
        let turns = vec![turn(1, 300)];
        let provider = Summarizer::new("unused");
        let event = c
            .maybe_compact(&turns, &provider, &RetryPolicy::default())
            .await
            .unwrap();
        assert!(event.is_none());
        assert!(provider.requests.lock().unwrap().is_empty());
    }
}
