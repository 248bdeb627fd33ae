//! Resilient source orchestration.
//!
//! A concrete source supplies only its fetch/parse/validate/transform and
//! fallback behavior through [`SourceAdapter`]. The orchestration (breaker
//! gate, retry-wrapped fetch, bookkeeping, uniform result envelope) is
//! shared. Three independent policies compose here without entangling:
//! the breaker decides *whether to try*, the retry executor decides *how
//! hard to try once allowed*, and the metrics decide *how healthy the
//! source is judged to be*.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::config::SourceConfig;
use crate::error::{ErrorKind, SourceError};
use crate::health::HealthRegistry;
use crate::retry::RetryExecutor;

/// Source-specific behavior plugged into the shared orchestration.
///
/// `fetch` is the only asynchronous stage; parse, validate and transform run
/// on the already-fetched payload in that fixed order. `fallback` builds the
/// degraded payload accompanying a failure result, typically a last-known
/// -good value, so dependents can show stale data instead of an error
/// screen.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Raw payload produced by the fetch stage.
    type Raw: Send;
    /// Structured form produced by the parse stage.
    type Parsed: Send;
    /// Final typed value handed to callers.
    type Output: Send;

    /// Name under which this source registers for gating and health.
    fn name(&self) -> &str;

    /// Fetch the raw payload from the external dependency.
    async fn fetch(&self) -> Result<Self::Raw, SourceError>;

    /// Parse the raw payload into the structured form.
    fn parse(&self, raw: Self::Raw) -> Result<Self::Parsed, SourceError>;

    /// Semantic checks on the parsed payload. A validation failure takes the
    /// same failure path as a fetch failure but is never retried.
    fn validate(&self, parsed: &Self::Parsed) -> Result<(), SourceError>;

    /// Shape the validated payload into the final output.
    fn transform(&self, parsed: Self::Parsed) -> Self::Output;

    /// Substitute payload accompanying a failure result, if any.
    fn fallback(&self, error: &SourceError) -> Option<Self::Output>;
}

/// Uniform result envelope returned for every call.
///
/// Created fresh per call and never mutated after return. On failure,
/// `data` may still carry the adapter's fallback payload so callers can
/// degrade gracefully.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub execution_time_ms: u64,
    pub breaker_state: CircuitState,
}

/// Shared orchestration wrapping one [`SourceAdapter`].
pub struct ResilientSource<A: SourceAdapter> {
    adapter: A,
    config: SourceConfig,
    breaker: Arc<CircuitBreaker>,
    retry: RetryExecutor,
    registry: Arc<HealthRegistry>,
}

impl<A: SourceAdapter> ResilientSource<A> {
    /// Build a source with its own breaker and register it.
    pub fn new(adapter: A, config: SourceConfig, registry: Arc<HealthRegistry>) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(adapter.name(), config.breaker.clone()));
        registry.register(adapter.name(), breaker.clone());
        Self::assemble(adapter, config, breaker, registry)
    }

    /// Build a source around an externally shared breaker.
    ///
    /// Registration is idempotent here: callers constructing a short-lived
    /// source per request around one long-lived breaker keep a single
    /// registry entry.
    pub fn with_breaker(
        adapter: A,
        config: SourceConfig,
        breaker: Arc<CircuitBreaker>,
        registry: Arc<HealthRegistry>,
    ) -> Self {
        registry.ensure_registered(adapter.name(), breaker.clone());
        Self::assemble(adapter, config, breaker, registry)
    }

    fn assemble(
        adapter: A,
        config: SourceConfig,
        breaker: Arc<CircuitBreaker>,
        registry: Arc<HealthRegistry>,
    ) -> Self {
        let retry = RetryExecutor::from_config(&config);
        Self {
            adapter,
            config,
            breaker,
            retry,
            registry,
        }
    }

    /// The breaker guarding this source.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// The source's configuration.
    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// The adapter supplying source-specific behavior.
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Produce data: breaker gate, retry-wrapped fetch, parse, validate,
    /// transform, bookkeeping, envelope. This is the only method consumers
    /// call; they never see a raw error.
    pub async fn scrape(&self) -> SourceResult<A::Output> {
        let started = Instant::now();
        let name = self.adapter.name();

        // Rejected calls record nothing further; the breaker already has the
        // data it needs.
        if !self.breaker.can_attempt() {
            warn!(source = %name, "call rejected by circuit breaker");
            let error = SourceError::CircuitOpen {
                source: name.to_string(),
            };
            return self.failure_result(error, started);
        }

        match self.run_pipeline().await {
            Ok(data) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                self.registry.record_success(name, elapsed_ms);
                info!(source = %name, elapsed_ms, "scrape successful");

                SourceResult {
                    success: true,
                    data: Some(data),
                    error: None,
                    error_kind: None,
                    execution_time_ms: elapsed_ms,
                    breaker_state: self.breaker.state(),
                }
            }
            Err(source_error) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                self.registry.record_failure(name, elapsed_ms);
                error!(source = %name, error = %source_error, elapsed_ms, "scrape failed");

                self.failure_result(source_error, started)
            }
        }
    }

    async fn run_pipeline(&self) -> Result<A::Output, SourceError> {
        let raw = self.retry.execute(|| self.adapter.fetch()).await?;
        let parsed = self.adapter.parse(raw)?;
        self.adapter.validate(&parsed)?;
        Ok(self.adapter.transform(parsed))
    }

    fn failure_result(&self, error: SourceError, started: Instant) -> SourceResult<A::Output> {
        let data = self.adapter.fallback(&error);
        SourceResult {
            success: false,
            data,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            execution_time_ms: started.elapsed().as_millis() as u64,
            breaker_state: self.breaker.state(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BreakerConfig;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Adapter returning scripted fetch outcomes; value 0 fails validation.
    struct MockAdapter {
        outcomes: Mutex<VecDeque<Result<u32, SourceError>>>,
        fetch_calls: AtomicU32,
        fallback_value: Option<u32>,
    }

    impl MockAdapter {
        fn new(outcomes: Vec<Result<u32, SourceError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                fetch_calls: AtomicU32::new(0),
                fallback_value: Some(99),
            }
        }

        fn calls(&self) -> u32 {
            self.fetch_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SourceAdapter for MockAdapter {
        type Raw = u32;
        type Parsed = u32;
        type Output = u32;

        fn name(&self) -> &str {
            "mock-source"
        }

        async fn fetch(&self) -> Result<u32, SourceError> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes
                .lock()
                .pop_front()
                .unwrap_or(Err(SourceError::transport("unexpected call")))
        }

        fn parse(&self, raw: u32) -> Result<u32, SourceError> {
            Ok(raw)
        }

        fn validate(&self, parsed: &u32) -> Result<(), SourceError> {
            if *parsed == 0 {
                Err(SourceError::Validation("rate is zero".into()))
            } else {
                Ok(())
            }
        }

        fn transform(&self, parsed: u32) -> u32 {
            parsed * 10
        }

        fn fallback(&self, _error: &SourceError) -> Option<u32> {
            self.fallback_value
        }
    }

    fn test_config() -> SourceConfig {
        SourceConfig::new("mock-source")
            .with_timeout(Duration::from_secs(5))
            .with_max_retries(2)
            .with_base_delay(Duration::from_millis(1))
            .with_jitter(false)
            .with_breaker(BreakerConfig::default().with_failure_threshold(3))
    }

    #[tokio::test]
    async fn success_flows_through_the_pipeline() {
        let registry = Arc::new(HealthRegistry::new());
        let source = ResilientSource::new(MockAdapter::new(vec![Ok(18)]), test_config(), registry.clone());

        let result = source.scrape().await;

        assert!(result.success);
        assert_eq!(result.data, Some(180));
        assert!(result.error.is_none());
        assert_eq!(result.breaker_state, CircuitState::Closed);

        let status = registry.health_status("mock-source").unwrap();
        assert_eq!(status.total_requests, 1);
        assert_eq!(status.total_failures, 0);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_within_one_call() {
        let registry = Arc::new(HealthRegistry::new());
        let adapter = MockAdapter::new(vec![
            Err(SourceError::http_status(503, "unavailable")),
            Ok(18),
        ]);
        let source = ResilientSource::new(adapter, test_config(), registry.clone());

        let result = source.scrape().await;

        assert!(result.success);
        assert_eq!(source.adapter().calls(), 2);
        // One call, one success: retries are invisible to the metrics.
        let status = registry.health_status("mock-source").unwrap();
        assert_eq!(status.total_requests, 1);
    }

    #[tokio::test]
    async fn open_breaker_short_circuits_without_fetching() {
        let registry = Arc::new(HealthRegistry::new());
        let adapter = MockAdapter::new(vec![
            Err(SourceError::Validation("bad".into())),
            Err(SourceError::Validation("bad".into())),
            Err(SourceError::Validation("bad".into())),
        ]);
        let source = ResilientSource::new(adapter, test_config(), registry.clone());

        for _ in 0..3 {
            assert!(!source.scrape().await.success);
        }
        assert_eq!(source.breaker().state(), CircuitState::Open);
        assert_eq!(source.adapter().calls(), 3);
        let requests_before = registry.health_status("mock-source").unwrap().total_requests;

        let result = source.scrape().await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::CircuitOpen));
        assert_eq!(result.data, Some(99));
        // No fetch attempt, no bookkeeping beyond the rejection.
        assert_eq!(source.adapter().calls(), 3);
        assert_eq!(
            registry.health_status("mock-source").unwrap().total_requests,
            requests_before
        );
    }

    #[tokio::test]
    async fn validation_failure_is_not_retried() {
        let registry = Arc::new(HealthRegistry::new());
        let adapter = MockAdapter::new(vec![Ok(0), Ok(18)]);
        let source = ResilientSource::new(adapter, test_config(), registry.clone());

        let result = source.scrape().await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Validation));
        assert_eq!(result.data, Some(99));
        assert_eq!(source.adapter().calls(), 1);

        let status = registry.health_status("mock-source").unwrap();
        assert_eq!(status.total_failures, 1);
        assert_eq!(status.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_as_tagged_failure() {
        let registry = Arc::new(HealthRegistry::new());
        let adapter = MockAdapter::new(vec![
            Err(SourceError::http_status(500, "boom")),
            Err(SourceError::http_status(500, "boom")),
            Err(SourceError::http_status(500, "boom")),
        ]);
        let source = ResilientSource::new(adapter, test_config(), registry.clone());

        let result = source.scrape().await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::RetriesExhausted));
        assert_eq!(source.adapter().calls(), 3);
        // Three attempts inside one call count once against the breaker.
        assert_eq!(source.breaker().snapshot().failure_count, 1);
    }

    #[tokio::test]
    async fn shared_breaker_spans_source_values() {
        let registry = Arc::new(HealthRegistry::new());
        let breaker = Arc::new(CircuitBreaker::new(
            "mock-source",
            BreakerConfig::default().with_failure_threshold(1),
        ));

        let first = ResilientSource::with_breaker(
            MockAdapter::new(vec![Err(SourceError::transport("tls failure"))]),
            test_config(),
            breaker.clone(),
            registry.clone(),
        );
        assert!(!first.scrape().await.success);

        // A fresh source value around the same breaker inherits its state.
        let second = ResilientSource::with_breaker(
            MockAdapter::new(vec![Ok(18)]),
            test_config(),
            breaker.clone(),
            registry.clone(),
        );
        let result = second.scrape().await;
        assert_eq!(result.error_kind, Some(ErrorKind::CircuitOpen));
        assert_eq!(second.adapter().calls(), 0);
    }
}
