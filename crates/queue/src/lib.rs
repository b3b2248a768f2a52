//! At-least-once job queue for batch submissions.
//!
//! A delivered job stays invisible to other consumers while its lease
//! (visibility timeout) holds. Consumers must [`JobQueue::ack`] after the
//! work is finished or [`JobQueue::nack`] to schedule a redelivery with
//! exponential backoff. Jobs whose lease expires are redelivered while
//! attempts remain and reaped once the budget is spent.

pub mod config;
pub mod error;
pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use genbatch_core::job::GenerationJob;
use genbatch_core::types::DbId;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use config::QueueConfig;
pub use error::QueueError;
pub use memory::MemoryQueue;
pub use postgres::PgJobQueue;

/// Identifies one delivery of a job. Stale handles are rejected once the
/// lease has passed to another consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: DbId,
    pub execution_id: Uuid,
    pub lock_token: Uuid,
    /// 1-based delivery number.
    pub attempt: u32,
    /// Attempt budget recorded with the job when it was enqueued.
    pub max_attempts: u32,
}

/// A claimed job together with its handle.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub handle: JobHandle,
    pub job: GenerationJob,
}

/// Result of [`JobQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueOutcome {
    pub job_id: DbId,
    /// `false` when a job with the same execution id already existed.
    pub inserted: bool,
}

/// What happened to a negatively acknowledged job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    /// Redelivery scheduled after `delay`.
    Retrying { delay: Duration },
    /// The attempt budget is spent; the job is failed.
    Exhausted,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Add a job keyed by its execution id. Re-enqueueing an existing key
    /// is a no-op that reports the existing job.
    async fn enqueue(&self, job: &GenerationJob) -> Result<EnqueueOutcome, QueueError>;

    /// Wait for the next deliverable job. Returns `None` once `shutdown`
    /// is cancelled.
    async fn dequeue(&self, shutdown: &CancellationToken) -> Result<Option<Delivery>, QueueError>;

    /// Mark a delivery as done.
    async fn ack(&self, handle: &JobHandle) -> Result<(), QueueError>;

    /// Report a failed delivery.
    async fn nack(&self, handle: &JobHandle, reason: &str) -> Result<NackOutcome, QueueError>;

    /// Fail jobs whose lease expired with no attempts left. Returns the
    /// execution ids of the failed jobs.
    async fn reap_abandoned(&self) -> Result<Vec<Uuid>, QueueError>;
}
