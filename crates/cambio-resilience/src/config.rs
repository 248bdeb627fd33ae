//! Per-source configuration.
//!
//! Configuration is resolved once at process start and never mutated
//! afterwards. The execution profile (long-running server vs. serverless
//! function) is detected from deployment metadata in one place; nothing else
//! in the codebase inspects the environment.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a source's circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures in the closed state before opening the circuit.
    pub failure_threshold: u32,
    /// Consecutive successes in the half-open state before closing.
    pub success_threshold: u32,
    /// Time the circuit stays open before a recovery probe is allowed.
    pub timeout: Duration,
    /// Maximum concurrent probes admitted while half-open.
    pub half_open_max_probes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
            half_open_max_probes: 1,
        }
    }
}

impl BreakerConfig {
    /// Set the failure threshold.
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the success threshold.
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Set the open-state timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Static tuning for one named external source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceConfig {
    /// Source name; the key under which the source registers for health
    /// tracking.
    pub name: String,
    /// Overall deadline for one call, covering every retry attempt.
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub base_delay: Duration,
    /// Hard cap on the backoff delay.
    pub max_delay: Duration,
    /// Randomize backoff delays to avoid synchronized retries.
    pub jitter: bool,
    /// Circuit breaker tuning.
    pub breaker: BreakerConfig,
}

impl SourceConfig {
    /// Create a configuration with defaults for a long-running process.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timeout: Duration::from_secs(15),
            max_retries: 2,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(10),
            jitter: true,
            breaker: BreakerConfig::default(),
        }
    }

    /// Create a configuration adapted to the given execution profile.
    ///
    /// Serverless invocations have a hard wall-clock budget, so timeouts
    /// shrink and one retry is dropped.
    pub fn for_profile(name: impl Into<String>, profile: ExecutionProfile) -> Self {
        let config = Self::new(name);
        match profile {
            ExecutionProfile::LongRunning => config,
            ExecutionProfile::Serverless => config
                .with_timeout(Duration::from_secs(8))
                .with_max_retries(1)
                .with_max_delay(Duration::from_secs(4)),
        }
    }

    /// Tolerances for the official central-bank page scrape.
    pub fn official_rates(profile: ExecutionProfile) -> Self {
        Self::for_profile("official-rates", profile)
            .with_breaker(BreakerConfig::default().with_timeout(Duration::from_secs(60)))
    }

    /// Tolerances for the peer-to-peer advertisement API.
    pub fn p2p_rates(profile: ExecutionProfile) -> Self {
        Self::for_profile("p2p-rates", profile)
            .with_base_delay(Duration::from_millis(500))
            .with_breaker(
                BreakerConfig::default()
                    .with_failure_threshold(5)
                    .with_timeout(Duration::from_secs(30)),
            )
    }

    /// Tolerances for the chat-completion API.
    pub fn chat(profile: ExecutionProfile) -> Self {
        let config = Self::for_profile("ai-chat", profile)
            .with_max_retries(2)
            .with_base_delay(Duration::from_millis(1000))
            .with_max_delay(Duration::from_secs(10));
        match profile {
            ExecutionProfile::LongRunning => config.with_timeout(Duration::from_secs(30)),
            ExecutionProfile::Serverless => config.with_timeout(Duration::from_secs(8)),
        }
    }

    /// Set the overall call deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry count.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the backoff base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the backoff cap.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable backoff jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set the breaker tuning.
    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }
}

/// Where the process is running, resolved once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionProfile {
    /// A long-lived server process.
    LongRunning,
    /// A short-lived serverless invocation with a hard wall-clock budget.
    Serverless,
}

impl ExecutionProfile {
    /// Detect the profile from deployment metadata.
    ///
    /// Call this once during startup and thread the result through source
    /// construction.
    pub fn detect() -> Self {
        const MARKERS: [&str; 3] = ["VERCEL", "AWS_LAMBDA_FUNCTION_NAME", "FUNCTION_TARGET"];
        if MARKERS.iter().any(|var| std::env::var_os(var).is_some()) {
            Self::Serverless
        } else {
            Self::LongRunning
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_breaker_config() {
        let config = BreakerConfig::default();
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.success_threshold, 2);
        assert_eq!(config.half_open_max_probes, 1);
    }

    #[test]
    fn serverless_profile_tightens_budgets() {
        let long = SourceConfig::for_profile("test", ExecutionProfile::LongRunning);
        let short = SourceConfig::for_profile("test", ExecutionProfile::Serverless);

        assert!(short.timeout < long.timeout);
        assert!(short.max_retries < long.max_retries);
    }

    #[test]
    fn chat_preset_keeps_retry_budget() {
        let config = SourceConfig::chat(ExecutionProfile::Serverless);
        assert_eq!(config.name, "ai-chat");
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.timeout, Duration::from_secs(8));
    }

    #[test]
    fn builder_methods() {
        let config = SourceConfig::new("official-rates")
            .with_timeout(Duration::from_secs(5))
            .with_max_retries(4)
            .with_jitter(false)
            .with_breaker(BreakerConfig::default().with_failure_threshold(7));

        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.max_retries, 4);
        assert!(!config.jitter);
        assert_eq!(config.breaker.failure_threshold, 7);
    }
}
