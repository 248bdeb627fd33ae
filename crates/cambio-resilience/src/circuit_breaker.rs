//! Circuit breaker state machine.
//!
//! One breaker guards one named external source with three states:
//! - Closed: normal operation, calls are allowed
//! - Open: the source is assumed down, calls are rejected without a network
//!   attempt
//! - Half-open: recovery probing, a bounded number of calls allowed through
//!
//! The breaker performs no I/O itself; it is consulted before and updated
//! after every attempt. The whole record sits behind one mutex so that state
//! transitions, in particular the open to half-open check-and-transition and
//! the half-open probe admission, are serialized across concurrent callers.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{error, info, warn};

use crate::config::BreakerConfig;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - calls are allowed.
    Closed,
    /// Circuit is open - calls are rejected.
    Open,
    /// Testing recovery - limited calls allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Mutable breaker bookkeeping, owned exclusively by one breaker instance.
#[derive(Debug)]
struct BreakerRecord {
    state: CircuitState,
    /// Consecutive failures while closed.
    failure_count: u32,
    /// Consecutive successes while half-open.
    success_count: u32,
    /// Probes currently in flight while half-open.
    probes_in_flight: u32,
    last_failure: Option<Instant>,
    last_state_change: Instant,
}

impl BreakerRecord {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            probes_in_flight: 0,
            last_failure: None,
            last_state_change: Instant::now(),
        }
    }
}

/// Read-only view of breaker state for monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    /// Milliseconds since the last recorded failure, if any.
    pub ms_since_last_failure: Option<u64>,
    /// Milliseconds since the last state transition.
    pub ms_since_state_change: u64,
}

/// Per-source circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    record: Mutex<BreakerRecord>,
}

impl CircuitBreaker {
    /// Create a breaker for the named source.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            record: Mutex::new(BreakerRecord::new()),
        }
    }

    /// The source this breaker guards.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The breaker's configuration.
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Decide whether a call may be attempted right now.
    ///
    /// In the open state this also performs the open → half-open transition
    /// once the recovery timeout has elapsed since the last failure; the
    /// caller that observes the transition is admitted as the first probe.
    pub fn can_attempt(&self) -> bool {
        let mut record = self.record.lock();

        match record.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let recovered = record
                    .last_failure
                    .map(|at| at.elapsed() >= self.config.timeout)
                    .unwrap_or(true);

                if recovered {
                    record.state = CircuitState::HalfOpen;
                    record.last_state_change = Instant::now();
                    record.success_count = 0;
                    record.probes_in_flight = 1;
                    info!(source = %self.name, "circuit breaker transitioning to half-open");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if record.probes_in_flight < self.config.half_open_max_probes {
                    record.probes_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut record = self.record.lock();
        record.failure_count = 0;

        if record.state == CircuitState::HalfOpen {
            record.probes_in_flight = record.probes_in_flight.saturating_sub(1);
            record.success_count += 1;
            if record.success_count >= self.config.success_threshold {
                record.state = CircuitState::Closed;
                record.last_state_change = Instant::now();
                record.success_count = 0;
                record.probes_in_flight = 0;
                info!(source = %self.name, "circuit breaker closed after successful recovery");
            }
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut record = self.record.lock();
        record.failure_count += 1;
        record.last_failure = Some(Instant::now());

        match record.state {
            CircuitState::HalfOpen => {
                record.state = CircuitState::Open;
                record.last_state_change = Instant::now();
                record.success_count = 0;
                record.probes_in_flight = 0;
                warn!(source = %self.name, "circuit breaker re-opened after half-open failure");
            }
            CircuitState::Closed => {
                if record.failure_count >= self.config.failure_threshold {
                    record.state = CircuitState::Open;
                    record.last_state_change = Instant::now();
                    error!(
                        source = %self.name,
                        failures = record.failure_count,
                        "circuit breaker opened"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Current state, without the recovery-timeout side effect.
    pub fn state(&self) -> CircuitState {
        self.record.lock().state
    }

    /// Read-only snapshot for monitoring.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let record = self.record.lock();
        BreakerSnapshot {
            state: record.state,
            failure_count: record.failure_count,
            success_count: record.success_count,
            ms_since_last_failure: record.last_failure.map(|at| at.elapsed().as_millis() as u64),
            ms_since_state_change: record.last_state_change.elapsed().as_millis() as u64,
        }
    }

    /// Force the breaker closed and zero all counters.
    pub fn reset(&self) {
        let mut record = self.record.lock();
        *record = BreakerRecord::new();
        info!(source = %self.name, "circuit breaker manually reset");
    }
}
