//! Failure taxonomy shared by the generation client, the storage
//! collaborator and the batch processor.
//!
//! Every failure that can end up on a batch result is tagged with an
//! [`ErrorKind`]. The kind alone decides whether the failing operation may
//! be retried and whether the whole batch must be aborted.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Classified failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad prompt or options, or the API rejected the request shape.
    Validation,
    /// Invalid or unresolvable credential.
    Auth,
    /// HTTP 429 from the upstream API.
    RateLimit,
    /// HTTP 5xx from the upstream API.
    Server,
    /// The attempt exceeded its timeout.
    Timeout,
    /// Connection-level failure that was not a timeout.
    Network,
    /// The API answered successfully but produced no usable image.
    EmptyResult,
    /// Persisting the generated artifact failed.
    Storage,
}

impl ErrorKind {
    /// Classify a non-success HTTP status code.
    ///
    /// - 401/403 -> `Auth`
    /// - 429 -> `RateLimit`
    /// - other 4xx -> `Validation`
    /// - everything else -> `Server`
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Auth,
            429 => Self::RateLimit,
            400..=499 => Self::Validation,
            _ => Self::Server,
        }
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::Server | Self::Timeout | Self::Network | Self::Storage
        )
    }

    /// Whether this failure makes every remaining prompt in the batch pointless.
    pub fn aborts_batch(self) -> bool {
        matches!(self, Self::Auth)
    }

    /// Stable snake_case name, stored in `batch_results.error_kind`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Auth => "auth",
            Self::RateLimit => "rate_limit",
            Self::Server => "server",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::EmptyResult => "empty_result",
            Self::Storage => "storage",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Canned causes
// ---------------------------------------------------------------------------

/// Cause recorded when the job-level redelivery budget is exhausted.
pub const CAUSE_PROCESSING_INCOMPLETE: &str = "processing could not complete";

/// Cause recorded on items left in `processing` by a crashed delivery.
pub const CAUSE_INTERRUPTED: &str = "processing was interrupted";

/// Cause recorded on items skipped because the execution was cancelled.
pub const CAUSE_CANCELLED: &str = "cancelled";

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
