//! Attempt state machine for calls to the external generation API.
//!
//! The client drives the transitions
//! `Attempting(n) -> Retrying { delay } -> Attempting(n + 1)` or
//! `Attempting(n) -> Failed`; success leaves the machine directly.
//! All timing rules live in [`RetryPolicy`] so they can be tested without
//! any HTTP traffic.

use std::time::Duration;

use crate::failure::ErrorKind;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Attempts per generation call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Timeout of the first attempt.
pub const DEFAULT_BASE_TIMEOUT: Duration = Duration::from_millis(120_000);

/// Extra time granted to each subsequent attempt.
pub const DEFAULT_TIMEOUT_STEP: Duration = Duration::from_millis(30_000);

/// Backoff unit after a timed-out attempt (multiplied by the attempt number).
pub const DEFAULT_TIMEOUT_BACKOFF_UNIT: Duration = Duration::from_millis(5_000);

/// Backoff unit after any other retryable failure.
pub const DEFAULT_ERROR_BACKOFF_UNIT: Duration = Duration::from_millis(2_000);

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Timing and budget rules for one resilient call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_timeout: Duration,
    pub timeout_step: Duration,
    pub timeout_backoff_unit: Duration,
    pub error_backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_timeout: DEFAULT_BASE_TIMEOUT,
            timeout_step: DEFAULT_TIMEOUT_STEP,
            timeout_backoff_unit: DEFAULT_TIMEOUT_BACKOFF_UNIT,
            error_backoff_unit: DEFAULT_ERROR_BACKOFF_UNIT,
        }
    }
}

impl RetryPolicy {
    /// Default policy with a different first-attempt timeout.
    pub fn with_base_timeout(base_timeout: Duration) -> Self {
        Self {
            base_timeout,
            ..Default::default()
        }
    }

    /// Timeout for 1-based `attempt`: `base + step * (attempt - 1)`.
    pub fn timeout_for(&self, attempt: u32) -> Duration {
        self.base_timeout + self.timeout_step * attempt.saturating_sub(1)
    }

    /// Delay inserted after 1-based `attempt` failed with `kind`.
    ///
    /// Timeouts correlate with upstream overload and get the longer unit.
    pub fn backoff_after(&self, attempt: u32, kind: ErrorKind) -> Duration {
        let unit = if kind == ErrorKind::Timeout {
            self.timeout_backoff_unit
        } else {
            self.error_backoff_unit
        };
        unit * attempt
    }

    /// Transition taken when 1-based `attempt` failed with `kind`.
    pub fn on_failure(&self, attempt: u32, kind: ErrorKind) -> AttemptState {
        if kind.is_retryable() && attempt < self.max_attempts {
            AttemptState::Retrying {
                next_attempt: attempt + 1,
                delay: self.backoff_after(attempt, kind),
            }
        } else {
            AttemptState::Failed {
                kind,
                attempts: attempt,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// AttemptState
// ---------------------------------------------------------------------------

/// State of one resilient call between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// About to perform the given 1-based attempt.
    Attempting(u32),
    /// Sleep for `delay`, then perform `next_attempt`.
    Retrying { next_attempt: u32, delay: Duration },
    /// No further attempts will be made.
    Failed { kind: ErrorKind, attempts: u32 },
}

impl AttemptState {
    pub fn start() -> Self {
        Self::Attempting(1)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
