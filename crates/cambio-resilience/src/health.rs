//! Process-wide health directory.
//!
//! One registry instance is created at process start and threaded through
//! source construction; there is no implicit global. Sources register
//! themselves exactly once when they are built and are never unregistered;
//! the set of external dependencies is fixed and known.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::warn;

use crate::circuit_breaker::CircuitBreaker;
use crate::metrics::{HealthStatus, SourceMetrics};

struct RegistryEntry {
    breaker: Arc<CircuitBreaker>,
    metrics: SourceMetrics,
}

/// Directory mapping source name to its breaker and rolling metrics.
#[derive(Default)]
pub struct HealthRegistry {
    entries: DashMap<String, RegistryEntry>,
}

impl HealthRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source under its name.
    ///
    /// The first registration wins: a name registered twice would split
    /// breaker state across two instances and defeat the gating guarantee,
    /// so a duplicate keeps the existing entry. Callers that deliberately
    /// share one breaker across short-lived source values rely on this.
    pub fn register(&self, name: impl Into<String>, breaker: Arc<CircuitBreaker>) {
        let name = name.into();
        match self.entries.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                warn!(source = %name, "source already registered, keeping existing entry");
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(RegistryEntry {
                    metrics: SourceMetrics::new(name),
                    breaker,
                });
            }
        }
    }

    /// Register a source only if its name is not already present.
    ///
    /// Used by callers that build short-lived source values around one
    /// long-lived breaker (the chat path); re-running construction must not
    /// warn or replace anything.
    pub fn ensure_registered(&self, name: impl Into<String>, breaker: Arc<CircuitBreaker>) {
        let name = name.into();
        if let dashmap::mapref::entry::Entry::Vacant(slot) = self.entries.entry(name.clone()) {
            slot.insert(RegistryEntry {
                metrics: SourceMetrics::new(name),
                breaker,
            });
        }
    }

    /// Record a successful call on the named source's breaker and metrics.
    pub fn record_success(&self, name: &str, response_time_ms: u64) {
        match self.entries.get(name) {
            Some(entry) => {
                entry.breaker.record_success();
                entry.metrics.record_success(response_time_ms);
            }
            None => warn!(source = %name, "recording success for unregistered source"),
        }
    }

    /// Record a failed call on the named source's breaker and metrics.
    pub fn record_failure(&self, name: &str, response_time_ms: u64) {
        match self.entries.get(name) {
            Some(entry) => {
                entry.breaker.record_failure();
                entry.metrics.record_failure(response_time_ms);
            }
            None => warn!(source = %name, "recording failure for unregistered source"),
        }
    }

    /// Health snapshot for one source.
    pub fn health_status(&self, name: &str) -> Option<HealthStatus> {
        self.entries
            .get(name)
            .map(|entry| entry.metrics.health_status(entry.breaker.state()))
    }

    /// Health snapshots for every registered source, ordered by name.
    pub fn all_health_statuses(&self) -> Vec<HealthStatus> {
        let mut statuses: Vec<HealthStatus> = self
            .entries
            .iter()
            .map(|entry| entry.metrics.health_status(entry.breaker.state()))
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Whether every registered source is currently healthy.
    ///
    /// An empty registry is vacuously healthy.
    pub fn all_healthy(&self) -> bool {
        self.entries
            .iter()
            .all(|entry| entry.metrics.health_status(entry.breaker.state()).healthy)
    }

    /// Administrative override: zero the named source's rolling metrics.
    ///
    /// The breaker is left untouched; forcing it closed is a separate,
    /// deliberate action on the breaker itself.
    pub fn reset_metrics(&self, name: &str) {
        if let Some(entry) = self.entries.get(name) {
            entry.metrics.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BreakerConfig;

    fn registry_with(name: &str) -> (HealthRegistry, Arc<CircuitBreaker>) {
        let registry = HealthRegistry::new();
        let breaker = Arc::new(CircuitBreaker::new(
            name,
            BreakerConfig::default().with_failure_threshold(3),
        ));
        registry.register(name, breaker.clone());
        (registry, breaker)
    }

    #[test]
    fn registers_and_reports() {
        let (registry, _breaker) = registry_with("official-rates");

        let status = registry.health_status("official-rates").unwrap();
        assert_eq!(status.name, "official-rates");
        assert!(status.healthy);
        assert!(registry.health_status("unknown").is_none());
    }

    #[test]
    fn records_update_breaker_and_metrics() {
        let (registry, breaker) = registry_with("official-rates");

        registry.record_failure("official-rates", 200);
        registry.record_failure("official-rates", 250);
        registry.record_failure("official-rates", 300);

        let status = registry.health_status("official-rates").unwrap();
        assert_eq!(status.total_failures, 3);
        assert_eq!(status.consecutive_failures, 3);
        assert_eq!(status.breaker_state, crate::CircuitState::Open);
        assert!(!breaker.can_attempt());
    }

    #[test]
    fn first_registration_wins() {
        let (registry, original) = registry_with("p2p-rates");

        let imposter = Arc::new(CircuitBreaker::new(
            "p2p-rates",
            BreakerConfig::default().with_failure_threshold(1),
        ));
        registry.register("p2p-rates", imposter.clone());

        // A single failure trips the imposter's threshold but not the
        // original's; the registry must still be wired to the original.
        registry.record_failure("p2p-rates", 100);
        let status = registry.health_status("p2p-rates").unwrap();
        assert_eq!(status.breaker_state, crate::CircuitState::Closed);
        assert_eq!(original.snapshot().failure_count, 1);
        assert_eq!(imposter.snapshot().failure_count, 0);
    }

    #[test]
    fn all_healthy_tracks_every_source() {
        let registry = HealthRegistry::new();
        registry.register(
            "official-rates",
            Arc::new(CircuitBreaker::new("official-rates", BreakerConfig::default())),
        );
        registry.register(
            "p2p-rates",
            Arc::new(CircuitBreaker::new("p2p-rates", BreakerConfig::default())),
        );

        registry.record_success("official-rates", 100);
        registry.record_success("p2p-rates", 100);
        assert!(registry.all_healthy());

        for _ in 0..5 {
            registry.record_failure("p2p-rates", 100);
        }
        assert!(!registry.all_healthy());

        let statuses = registry.all_health_statuses();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].name, "official-rates");
        assert_eq!(statuses[1].name, "p2p-rates");
    }

    #[test]
    fn reset_metrics_keeps_breaker_state() {
        let (registry, breaker) = registry_with("ai-chat");

        for _ in 0..3 {
            registry.record_failure("ai-chat", 100);
        }
        assert_eq!(breaker.state(), crate::CircuitState::Open);

        registry.reset_metrics("ai-chat");

        let status = registry.health_status("ai-chat").unwrap();
        assert_eq!(status.total_requests, 0);
        assert_eq!(status.breaker_state, crate::CircuitState::Open);
    }
}
