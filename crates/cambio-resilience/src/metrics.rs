//! Rolling per-source statistics.
//!
//! Metrics never drive correctness decisions; the breaker does that. They
//! exist so the health surface can judge a source that fails intermittently
//! often enough to be unreliable without ever tripping the breaker's
//! consecutive-failure threshold.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::circuit_breaker::CircuitState;

/// Response-time samples retained per source.
const RESPONSE_TIME_WINDOW: usize = 100;

/// Success-rate floor below which a source is judged unhealthy.
const HEALTHY_SUCCESS_RATE: f64 = 0.5;

/// Consecutive-failure ceiling above which a source is judged unhealthy.
const HEALTHY_CONSECUTIVE_FAILURES: u64 = 5;

fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Default)]
struct MetricsInner {
    total_requests: u64,
    total_successes: u64,
    total_failures: u64,
    consecutive_failures: u64,
    last_success_ms: Option<u64>,
    last_failure_ms: Option<u64>,
    response_times: VecDeque<u64>,
}

impl MetricsInner {
    fn push_response_time(&mut self, ms: u64) {
        self.response_times.push_back(ms);
        if self.response_times.len() > RESPONSE_TIME_WINDOW {
            self.response_times.pop_front();
        }
    }
}

/// Rolling statistics for one named source.
#[derive(Debug)]
pub struct SourceMetrics {
    name: String,
    inner: Mutex<MetricsInner>,
}

impl SourceMetrics {
    /// Create metrics for the named source.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(MetricsInner::default()),
        }
    }

    /// Record a successful call and its response time.
    pub fn record_success(&self, response_time_ms: u64) {
        let mut inner = self.inner.lock();
        inner.total_requests += 1;
        inner.total_successes += 1;
        inner.consecutive_failures = 0;
        inner.last_success_ms = Some(epoch_ms());
        inner.push_response_time(response_time_ms);
    }

    /// Record a failed call and its response time.
    ///
    /// Failures contribute timing too; a source that fails slowly is worse
    /// than one that fails fast.
    pub fn record_failure(&self, response_time_ms: u64) {
        let mut inner = self.inner.lock();
        inner.total_requests += 1;
        inner.total_failures += 1;
        inner.consecutive_failures += 1;
        inner.last_failure_ms = Some(epoch_ms());
        inner.push_response_time(response_time_ms);
    }

    /// Derive the health snapshot for this source.
    pub fn health_status(&self, breaker_state: CircuitState) -> HealthStatus {
        let inner = self.inner.lock();

        let success_rate = if inner.total_requests > 0 {
            inner.total_successes as f64 / inner.total_requests as f64
        } else {
            1.0
        };

        let avg_response_time_ms = if inner.response_times.is_empty() {
            0
        } else {
            let sum: u64 = inner.response_times.iter().sum();
            (sum as f64 / inner.response_times.len() as f64).round() as u64
        };

        HealthStatus {
            name: self.name.clone(),
            healthy: breaker_state == CircuitState::Closed
                && success_rate > HEALTHY_SUCCESS_RATE
                && inner.consecutive_failures < HEALTHY_CONSECUTIVE_FAILURES,
            breaker_state,
            success_rate,
            avg_response_time_ms,
            total_requests: inner.total_requests,
            total_failures: inner.total_failures,
            consecutive_failures: inner.consecutive_failures,
            last_success_ms: inner.last_success_ms,
            last_failure_ms: inner.last_failure_ms,
        }
    }

    /// Zero all counters and drop the sample window.
    pub fn reset(&self) {
        *self.inner.lock() = MetricsInner::default();
    }
}

/// Derived, read-only health snapshot for one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub name: String,
    pub healthy: bool,
    pub breaker_state: CircuitState,
    pub success_rate: f64,
    pub avg_response_time_ms: u64,
    pub total_requests: u64,
    pub total_failures: u64,
    pub consecutive_failures: u64,
    /// Milliseconds since epoch of the last success, if any.
    pub last_success_ms: Option<u64>,
    /// Milliseconds since epoch of the last failure, if any.
    pub last_failure_ms: Option<u64>,
}
