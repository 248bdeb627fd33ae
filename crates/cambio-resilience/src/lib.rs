//! Cambio Resilience - fault tolerance for external data sources.
//!
//! This crate is the reusable core behind every third-party call the
//! application makes: currency-rate lookups and the chat-completion API.
//! It provides:
//! - Circuit breaker state machine (closed, open, half-open) per source
//! - Retry with exponential backoff under an overall deadline
//! - Rolling per-source metrics and a process-wide health registry
//! - A template orchestration that concrete sources plug into via
//!   [`SourceAdapter`]
//!
//! # Usage
//!
//! ```rust,ignore
//! use cambio_resilience::{ExecutionProfile, HealthRegistry, ResilientSource, SourceConfig};
//! use std::sync::Arc;
//!
//! let profile = ExecutionProfile::detect();
//! let registry = Arc::new(HealthRegistry::new());
//!
//! let source = ResilientSource::new(
//!     MyRatesAdapter::new(),
//!     SourceConfig::official_rates(profile),
//!     registry.clone(),
//! );
//!
//! let result = source.scrape().await;
//! if result.success {
//!     // fresh data
//! } else {
//!     // result.data may still carry a stale fallback payload
//! }
//! ```

// circuit breaker module - per-source gating state machine
pub mod circuit_breaker;

// config module - static per-source tuning, resolved once at startup
pub mod config;

// error module - failure taxonomy and retry classification
pub mod error;

// health module - process-wide health directory
pub mod health;

// metrics module - rolling per-source statistics
pub mod metrics;

// retry module - backoff under an overall deadline
pub mod retry;

// source module - shared orchestration and the adapter seam
pub mod source;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
pub use config::{BreakerConfig, ExecutionProfile, SourceConfig};
pub use error::{ErrorKind, SourceError};
pub use health::HealthRegistry;
pub use metrics::{HealthStatus, SourceMetrics};
pub use retry::{RetryExecutor, RetryPolicy};
pub use source::{ResilientSource, SourceAdapter, SourceResult};
