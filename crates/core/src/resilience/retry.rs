//! Bounded retries with exponential backoff.
//!
//! The executor only decides whether to try again; it never decides fallback. Once attempts
//! are exhausted, or an error is not retryable, the last error is surfaced to the caller.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::error::{ProviderError, ProviderErrorKind};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retryable: Vec<ProviderErrorKind>,
    /// Spread each delay by up to ±25% so concurrent callers do not retry in lockstep.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::ai_provider(
            Duration::from_millis(crate::constants::DEFAULT_RETRY_BASE_DELAY_MS),
            Duration::from_millis(crate::constants::DEFAULT_RETRY_MAX_DELAY_MS),
        )
    }
}

impl RetryPolicy {
    /// Preset for AI provider calls: transient and schema failures are retried, three attempts.
    pub fn ai_provider(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: 3,
            base_delay,
            max_delay,
            retryable: vec![
                ProviderErrorKind::Transient,
                ProviderErrorKind::SchemaValidation,
            ],
            jitter: true,
        }
    }

    /// Same policy with `max_retries` retries after the first attempt.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_attempts = max_retries.saturating_add(1);
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn is_retryable(&self, err: &ProviderError) -> bool {
        self.retryable.contains(&err.kind())
    }

    /// Delay before the retry that follows failed attempt number `attempt` (1-based).
    ///
    /// `base_delay * 2^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let raw = self.base_delay.saturating_mul(1u32 << exponent);
        let capped = raw.min(self.max_delay);
        if self.jitter {
            jittered(capped).min(self.max_delay)
        } else {
            capped
        }
    }
}

fn jittered(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.75..=1.25);
    delay.mul_f64(factor)
}

#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < max_attempts && self.policy.is_retryable(&err) => {
                    let delay = self.policy.delay_for(attempt);
                    tracing::debug!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying provider call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if attempt > 1 {
                        tracing::warn!(attempts = attempt, error = %err, "provider call failed after retries");
                    }
                    return Err(err);
                }
            }
        }
    }
}
