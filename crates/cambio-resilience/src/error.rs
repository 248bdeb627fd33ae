//! Error taxonomy for external-source calls.
//!
//! Every failure that can reach the orchestration layer is represented here,
//! together with its retry classification. Callers above the orchestration
//! never see these as raw `Err` values; they arrive folded into a
//! [`SourceResult`](crate::source::SourceResult) with an [`ErrorKind`]
//! discriminant.

use serde::{Deserialize, Serialize};

/// HTTP status codes worth retrying: rate limiting and transient 5xx.
const RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

/// Error raised while producing data from an external source.
//
// NOTE: `Display`/`Error` are implemented by hand rather than via
// `#[derive(thiserror::Error)]`. The `CircuitOpen` variant carries a field
// named `source` (a source *name*, per SPEC §"CircuitOpen { source }"), which
// thiserror unconditionally treats as the error's `std::error::Error::source()`
// — requiring the field to implement `Error`, which a `String` does not. There
// is no opt-out attribute, so the derive cannot be used while keeping the
// spec-mandated field name. The impls below reproduce exactly what the derive
// would generate from the original `#[error(...)]` format strings.
#[derive(Debug, Clone)]
pub enum SourceError {
    /// Rejected by the circuit breaker before any network attempt.
    CircuitOpen { source: String },

    /// Transport-level failure (connection error or HTTP error status).
    Transport {
        message: String,
        status: Option<u16>,
    },

    /// A single attempt exceeded its own timeout.
    AttemptTimeout { elapsed_ms: u64 },

    /// The overall retry-loop deadline elapsed; no further attempts are made.
    DeadlineExceeded { budget_ms: u64 },

    /// Raw data could not be parsed into the structured form.
    Parse(String),

    /// Structured data failed semantic checks (e.g. a non-positive rate).
    Validation(String),

    /// All retry attempts were consumed; wraps the last attempt's error.
    RetriesExhausted {
        attempts: u32,
        last: Box<SourceError>,
    },
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CircuitOpen { source } => {
                write!(f, "circuit breaker is open for source '{source}'")
            }
            Self::Transport { message, status } => {
                write!(f, "transport error: {message}{}", fmt_status(status))
            }
            Self::AttemptTimeout { elapsed_ms } => {
                write!(f, "attempt timed out after {elapsed_ms}ms")
            }
            Self::DeadlineExceeded { budget_ms } => write!(
                f,
                "deadline of {budget_ms}ms exceeded before the operation completed"
            ),
            Self::Parse(msg) => write!(f, "parse error: {msg}"),
            Self::Validation(msg) => write!(f, "validation error: {msg}"),
            Self::RetriesExhausted { attempts, last } => {
                write!(f, "retries exhausted after {attempts} attempts: {last}")
            }
        }
    }
}

impl std::error::Error for SourceError {}

impl SourceError {
    /// Convenience constructor for a transport error without a status code.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: None,
        }
    }

    /// Convenience constructor for an HTTP error status.
    pub fn http_status(status: u16, message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: Some(status),
        }
    }

    /// Whether another attempt could plausibly succeed.
    ///
    /// Timeouts, connection resets and the transient HTTP statuses (429,
    /// 500, 502, 503, 504) are retryable. Validation and parse failures are
    /// deterministic, so retrying cannot help. A breaker rejection is never
    /// retryable from the caller's side: the next attempt would be rejected
    /// just the same.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { status, message } => match status {
                Some(code) => RETRYABLE_STATUS_CODES.contains(code),
                None => {
                    let msg = message.to_lowercase();
                    msg.contains("timeout")
                        || msg.contains("timed out")
                        || msg.contains("connection reset")
                        || msg.contains("connection refused")
                        || msg.contains("econnreset")
                        || msg.contains("econnrefused")
                        || msg.contains("etimedout")
                }
            },
            Self::AttemptTimeout { .. } => true,
            Self::CircuitOpen { .. }
            | Self::DeadlineExceeded { .. }
            | Self::Parse(_)
            | Self::Validation(_)
            | Self::RetriesExhausted { .. } => false,
        }
    }

    /// Flat discriminant for result envelopes and dashboards.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Transport { .. } => {
                if self.is_retryable() {
                    ErrorKind::RetryableTransport
                } else {
                    ErrorKind::NonRetryableTransport
                }
            }
            Self::AttemptTimeout { .. } | Self::DeadlineExceeded { .. } => ErrorKind::Timeout,
            Self::Parse(_) => ErrorKind::Parse,
            Self::Validation(_) => ErrorKind::Validation,
            Self::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
        }
    }
}

/// Serializable error classification carried in result envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CircuitOpen,
    RetryableTransport,
    NonRetryableTransport,
    Timeout,
    Validation,
    Parse,
    RetriesExhausted,
}
