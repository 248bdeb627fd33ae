//! Mapping from HTTP client failures into the source error taxonomy.

use cambio_resilience::SourceError;

/// Convert a `reqwest` failure into a [`SourceError`].
///
/// Timeout and connect failures are normalized onto the markers the retry
/// classifier keys on; HTTP error statuses keep their code so the
/// classifier can apply the 429/5xx rule.
pub(crate) fn into_source_error(error: reqwest::Error) -> SourceError {
    if let Some(status) = error.status() {
        return SourceError::http_status(status.as_u16(), error.to_string());
    }
    if error.is_timeout() {
        return SourceError::transport(format!("request timed out: {error}"));
    }
    if error.is_connect() {
        return SourceError::transport(format!("connection refused: {error}"));
    }
    SourceError::transport(error.to_string())
}

/// Fail on non-2xx statuses, preserving the code for classification.
pub(crate) fn check_status(response: &reqwest::Response) -> Result<(), SourceError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(SourceError::http_status(
            status.as_u16(),
            format!("HTTP {status}"),
        ))
    }
}
