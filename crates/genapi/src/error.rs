//! Classified failure of one generation call.

use genbatch_core::failure::ErrorKind;

/// Maximum number of response-body characters kept in an error message.
const MAX_BODY_CHARS: usize = 500;

/// A failed generation call with its classification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct GenerationError {
    pub kind: ErrorKind,
    pub message: String,
    pub status_code: Option<u16>,
}

impl GenerationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn empty_result(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EmptyResult, message)
    }

    /// Build an error from a non-success HTTP response.
    ///
    /// Prefers the `error.message` field of a JSON error body and falls
    /// back to the raw body, truncated.
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(str::to_owned))
            .unwrap_or_else(|| body.chars().take(MAX_BODY_CHARS).collect());

        Self {
            kind: ErrorKind::from_status(status),
            message: format!("API returned HTTP {status}: {detail}"),
            status_code: Some(status),
        }
    }

    /// Classify a transport-level `reqwest` failure.
    pub fn from_transport(err: &reqwest::Error, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            Self::new(
                ErrorKind::Timeout,
                format!("Request timed out after {timeout_ms}ms"),
            )
        } else if err.is_decode() {
            Self::new(ErrorKind::Server, format!("Malformed response body: {err}"))
        } else {
            Self::new(ErrorKind::Network, format!("HTTP request failed: {err}"))
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}
