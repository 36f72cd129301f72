//! Retry policy for transient provider failures.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tracing::warn;

use super::{CompletionRequest, LlmProvider};
use crate::conversation::AssistantPayload;
use crate::errors::ProviderError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Rate limit, server errors, and Anthropic's "overloaded".
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 6] = [429, 500, 502, 503, 504, 529];

fn retryable_text_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"(?i)rate.?limit|overloaded|service.?unavailable|upstream.?connect|connection.?refused")
            .expect("retry regex must compile")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first request.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// Whether an HTTP failure should be retried, judged by status and error text.
    pub fn is_retryable_http_error(&self, status: u16, error_text: &str) -> bool {
        self.retryable_statuses.contains(&status) || retryable_text_regex().is_match(error_text)
    }

    /// Exponential backoff delay before retry number `attempt` (0-based), capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(30);
        let ms = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent))
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// Run a completion, retrying retryable failures with backoff.
///
/// Fatal errors and the final retryable error are returned unchanged.
pub async fn complete_with_retry(
    provider: &dyn LlmProvider,
    request: &CompletionRequest,
    policy: &RetryPolicy,
) -> Result<AssistantPayload, ProviderError> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match provider.complete(request).await {
            Ok(payload) => return Ok(payload),
            Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                let delay = policy.delay(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying model request"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
