//! Worker process configuration loaded from environment variables.

use std::time::Duration;

/// Default number of concurrent worker loops.
const DEFAULT_POOL_SIZE: usize = 2;
/// Default upload attempts per generated artifact.
const DEFAULT_STORAGE_UPLOAD_ATTEMPTS: u32 = 3;
/// Default delay between upload attempts, in milliseconds.
const DEFAULT_STORAGE_RETRY_DELAY_MS: u64 = 1_000;
/// Default bound on one upload attempt, in seconds.
const DEFAULT_STORAGE_UPLOAD_TIMEOUT_SECS: u64 = 60;
/// Default interval of the abandoned-job reaper, in seconds.
const DEFAULT_REAPER_INTERVAL_SECS: u64 = 60;
/// Default maximum number of database connections.
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

/// Worker process configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    /// Concurrent jobs per process. Prompts within a job never run
    /// concurrently.
    pub pool_size: usize,
    pub storage_upload_attempts: u32,
    pub storage_retry_delay: Duration,
    pub storage_upload_timeout: Duration,
    pub reaper_interval: Duration,
    /// Base64 AES-256 key for stored API credentials.
    pub credential_encryption_key: String,
    /// Emit JSON log lines instead of human-readable ones.
    pub log_json: bool,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                       | Required | Default |
    /// |-------------------------------|----------|---------|
    /// | `DATABASE_URL`                | **yes**  | --      |
    /// | `CREDENTIAL_ENCRYPTION_KEY`   | **yes**  | --      |
    /// | `DB_MAX_CONNECTIONS`          | no       | `10`    |
    /// | `WORKER_POOL_SIZE`            | no       | `2`     |
    /// | `STORAGE_UPLOAD_ATTEMPTS`     | no       | `3`     |
    /// | `STORAGE_RETRY_DELAY_MS`      | no       | `1000`  |
    /// | `STORAGE_UPLOAD_TIMEOUT_SECS` | no       | `60`    |
    /// | `REAPER_INTERVAL_SECS`        | no       | `60`    |
    /// | `LOG_FORMAT`                  | no       | `text`  |
    ///
    /// # Panics
    ///
    /// Panics if a required variable is missing or a value does not parse.
    pub fn from_env() -> Self {
        let database_url =
            std::env::var("DATABASE_URL").expect("DATABASE_URL must be set in the environment");

        let credential_encryption_key = std::env::var("CREDENTIAL_ENCRYPTION_KEY")
            .expect("CREDENTIAL_ENCRYPTION_KEY must be set in the environment");

        let db_max_connections: u32 = std::env::var("DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| DEFAULT_DB_MAX_CONNECTIONS.to_string())
            .parse()
            .expect("DB_MAX_CONNECTIONS must be a valid u32");

        let pool_size: usize = std::env::var("WORKER_POOL_SIZE")
            .unwrap_or_else(|_| DEFAULT_POOL_SIZE.to_string())
            .parse()
            .expect("WORKER_POOL_SIZE must be a valid usize");
        assert!(pool_size > 0, "WORKER_POOL_SIZE must be at least 1");

        let storage_upload_attempts: u32 = std::env::var("STORAGE_UPLOAD_ATTEMPTS")
            .unwrap_or_else(|_| DEFAULT_STORAGE_UPLOAD_ATTEMPTS.to_string())
            .parse()
            .expect("STORAGE_UPLOAD_ATTEMPTS must be a valid u32");

        let storage_retry_delay_ms: u64 = std::env::var("STORAGE_RETRY_DELAY_MS")
            .unwrap_or_else(|_| DEFAULT_STORAGE_RETRY_DELAY_MS.to_string())
            .parse()
            .expect("STORAGE_RETRY_DELAY_MS must be a valid u64");

        let storage_upload_timeout_secs: u64 = std::env::var("STORAGE_UPLOAD_TIMEOUT_SECS")
            .unwrap_or_else(|_| DEFAULT_STORAGE_UPLOAD_TIMEOUT_SECS.to_string())
            .parse()
            .expect("STORAGE_UPLOAD_TIMEOUT_SECS must be a valid u64");

        let reaper_interval_secs: u64 = std::env::var("REAPER_INTERVAL_SECS")
            .unwrap_or_else(|_| DEFAULT_REAPER_INTERVAL_SECS.to_string())
            .parse()
            .expect("REAPER_INTERVAL_SECS must be a valid u64");

        let log_json = std::env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Self {
            database_url,
            db_max_connections,
            pool_size,
            storage_upload_attempts: storage_upload_attempts.max(1),
            storage_retry_delay: Duration::from_millis(storage_retry_delay_ms),
            storage_upload_timeout: Duration::from_secs(storage_upload_timeout_secs.max(1)),
            reaper_interval: Duration::from_secs(reaper_interval_secs.max(1)),
            credential_encryption_key,
            log_json,
        }
    }
}
