//! Retry with exponential backoff under an overall deadline.
//!
//! The executor absorbs transient failures of a single operation so callers
//! do not re-implement backoff logic. Only errors classified retryable (see
//! [`SourceError::is_retryable`]) trigger another attempt; the whole retry
//! loop, not each individual attempt, is bounded by the configured
//! deadline.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SourceConfig;
use crate::error::SourceError;

/// Backoff and deadline tuning for one executor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub base_delay: Duration,
    /// Hard cap on any single backoff delay.
    pub max_delay: Duration,
    /// Overall deadline covering every attempt and delay.
    pub timeout: Duration,
    /// Randomize delays to avoid synchronized retries.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(10),
            timeout: Duration::from_secs(15),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Derive the policy from a source configuration.
    pub fn from_config(config: &SourceConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay,
            max_delay: config.max_delay,
            timeout: config.timeout,
            jitter: config.jitter,
        }
    }

    /// Delay before retry number `retry` (0-indexed).
    ///
    /// `min(base_delay * 2^retry, max_delay)`, scaled by a factor in
    /// [0.5, 1.0) when jitter is enabled.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let exponential = base_ms.saturating_mul(2u64.saturating_pow(retry.min(16)));

        let delay_ms = if self.jitter {
            use rand::Rng;
            let factor = 0.5 + rand::thread_rng().gen_range(0.0..0.5);
            (exponential as f64 * factor) as u64
        } else {
            exponential
        };

        Duration::from_millis(delay_ms).min(self.max_delay)
    }
}

/// Runs an asynchronous operation under a deadline, retrying with
/// exponential backoff on retryable failures.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Create an executor with the given policy.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Create an executor from a source configuration.
    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(RetryPolicy::from_config(config))
    }

    /// The executor's policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invoke `op` up to `max_retries + 1` times.
    ///
    /// Non-retryable errors propagate unchanged on first occurrence. When
    /// the policy allowed retries and all were consumed, the last error
    /// surfaces wrapped in [`SourceError::RetriesExhausted`]. When the overall deadline fires,
    /// any attempt still in flight is dropped and
    /// [`SourceError::DeadlineExceeded`] is returned, so the caller is never
    /// blocked past the declared deadline.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let budget_ms = self.policy.timeout.as_millis() as u64;
        let deadline = Instant::now() + self.policy.timeout;

        match tokio::time::timeout_at(deadline, self.run_attempts(op, deadline)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::DeadlineExceeded { budget_ms }),
        }
    }

    async fn run_attempts<T, F, Fut>(
        &self,
        mut op: F,
        deadline: Instant,
    ) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let attempts = self.policy.max_retries + 1;
        let mut last_error: Option<SourceError> = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.policy.delay_for(attempt - 1);
                // Starting another attempt is pointless if the backoff alone
                // would blow the deadline.
                if Instant::now() + delay >= deadline {
                    return Err(SourceError::DeadlineExceeded {
                        budget_ms: self.policy.timeout.as_millis() as u64,
                    });
                }
                debug!(
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after backoff"
                );
                tokio::time::sleep(delay).await;
            }

            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(attempt = attempt + 1, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) if !error.is_retryable() => {
                    debug!(%error, "non-retryable error, giving up");
                    return Err(error);
                }
                Err(error) => {
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        %error,
                        "attempt failed"
                    );
                    last_error = Some(error);
                }
            }
        }

        let last =
            last_error.unwrap_or_else(|| SourceError::transport("retry loop without result"));

        // A single-attempt budget that fails is a plain fast failure; the
        // exhaustion tag is reserved for calls that actually retried.
        if attempts == 1 {
            return Err(last);
        }

        Err(SourceError::RetriesExhausted {
            attempts,
            last: Box::new(last),
        })
    }
}
