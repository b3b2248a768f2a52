//! Queue tuning knobs.

use std::time::Duration;

/// Default deliveries per job, the first one included.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default base of the exponential redelivery backoff, in milliseconds.
const DEFAULT_BACKOFF_BASE_MS: u64 = 2_000;
/// Default lease of a delivered job, in seconds.
const DEFAULT_VISIBILITY_TIMEOUT_SECS: u64 = 1_800;
/// Default idle poll interval, in milliseconds.
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
/// Default number of completed jobs retained.
const DEFAULT_KEEP_COMPLETED: u32 = 100;
/// Default number of failed jobs retained.
const DEFAULT_KEEP_FAILED: u32 = 500;

/// Queue configuration shared by every backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Total deliveries per job.
    pub max_attempts: u32,
    /// Delay before the first redelivery; doubles on each further one.
    pub backoff_base: Duration,
    /// How long a delivered job stays invisible to other consumers.
    pub visibility_timeout: Duration,
    /// Sleep between polls when no job is deliverable.
    pub poll_interval: Duration,
    pub keep_completed: u32,
    pub keep_failed: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            visibility_timeout: Duration::from_secs(DEFAULT_VISIBILITY_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            keep_completed: DEFAULT_KEEP_COMPLETED,
            keep_failed: DEFAULT_KEEP_FAILED,
        }
    }
}

impl QueueConfig {
    /// Load queue configuration from environment variables.
    ///
    /// | Env Var                          | Default |
    /// |----------------------------------|---------|
    /// | `QUEUE_MAX_ATTEMPTS`             | `3`     |
    /// | `QUEUE_BACKOFF_BASE_MS`          | `2000`  |
    /// | `QUEUE_VISIBILITY_TIMEOUT_SECS`  | `1800`  |
    /// | `QUEUE_POLL_INTERVAL_MS`         | `1000`  |
    /// | `QUEUE_KEEP_COMPLETED`           | `100`   |
    /// | `QUEUE_KEEP_FAILED`              | `500`   |
    ///
    /// # Panics
    ///
    /// Panics if a variable is set to a value that does not parse.
    pub fn from_env() -> Self {
        let max_attempts: u32 = std::env::var("QUEUE_MAX_ATTEMPTS")
            .unwrap_or_else(|_| DEFAULT_MAX_ATTEMPTS.to_string())
            .parse()
            .expect("QUEUE_MAX_ATTEMPTS must be a valid u32");

        let backoff_base_ms: u64 = std::env::var("QUEUE_BACKOFF_BASE_MS")
            .unwrap_or_else(|_| DEFAULT_BACKOFF_BASE_MS.to_string())
            .parse()
            .expect("QUEUE_BACKOFF_BASE_MS must be a valid u64");

        let visibility_timeout_secs: u64 = std::env::var("QUEUE_VISIBILITY_TIMEOUT_SECS")
            .unwrap_or_else(|_| DEFAULT_VISIBILITY_TIMEOUT_SECS.to_string())
            .parse()
            .expect("QUEUE_VISIBILITY_TIMEOUT_SECS must be a valid u64");

        let poll_interval_ms: u64 = std::env::var("QUEUE_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| DEFAULT_POLL_INTERVAL_MS.to_string())
            .parse()
            .expect("QUEUE_POLL_INTERVAL_MS must be a valid u64");

        let keep_completed: u32 = std::env::var("QUEUE_KEEP_COMPLETED")
            .unwrap_or_else(|_| DEFAULT_KEEP_COMPLETED.to_string())
            .parse()
            .expect("QUEUE_KEEP_COMPLETED must be a valid u32");

        let keep_failed: u32 = std::env::var("QUEUE_KEEP_FAILED")
            .unwrap_or_else(|_| DEFAULT_KEEP_FAILED.to_string())
            .parse()
            .expect("QUEUE_KEEP_FAILED must be a valid u32");

        assert!(max_attempts > 0, "QUEUE_MAX_ATTEMPTS must be at least 1");

        Self {
            max_attempts,
            backoff_base: Duration::from_millis(backoff_base_ms),
            visibility_timeout: Duration::from_secs(visibility_timeout_secs),
            poll_interval: Duration::from_millis(poll_interval_ms),
            keep_completed,
            keep_failed,
        }
    }

    /// Delay before redelivering a job that has been delivered
    /// `attempts_made` times: `base * 2^(attempts_made - 1)`.
    pub fn redelivery_delay(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1u32 << exponent)
    }
}
