//! Durable queue backed by the `generation_jobs` table.

use async_trait::async_trait;
use genbatch_core::job::GenerationJob;
use genbatch_db::models::queue_job::{EnqueueJob, QueueJob};
use genbatch_db::models::status::QueueJobState;
use genbatch_db::repositories::QueueJobRepo;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{Delivery, EnqueueOutcome, JobHandle, JobQueue, NackOutcome, QueueConfig, QueueError};

/// [`JobQueue`] over Postgres. Safe to share between any number of
/// worker processes.
pub struct PgJobQueue {
    pool: PgPool,
    config: QueueConfig,
}

impl PgJobQueue {
    pub fn new(pool: PgPool, config: QueueConfig) -> Self {
        Self { pool, config }
    }

    /// Claim one deliverable job, if any.
    ///
    /// A row whose payload no longer parses can never be processed; it is
    /// failed on the spot and the claim moves on to the next row.
    async fn try_claim(&self) -> Result<Option<Delivery>, QueueError> {
        loop {
            let lock_token = Uuid::new_v4();
            let Some(row) =
                QueueJobRepo::claim_next(&self.pool, lock_token, self.config.visibility_timeout)
                    .await?
            else {
                return Ok(None);
            };

            match GenerationJob::from_payload(&row.payload) {
                Ok(job) => {
                    tracing::debug!(
                        job_id = row.id,
                        execution_id = %row.execution_id,
                        attempt = row.attempts_made,
                        "Claimed job",
                    );
                    return Ok(Some(Delivery {
                        handle: handle_for(&row, lock_token),
                        job,
                    }));
                }
                Err(e) => {
                    tracing::error!(
                        job_id = row.id,
                        execution_id = %row.execution_id,
                        error = %e,
                        "Discarding job with unreadable payload",
                    );
                    QueueJobRepo::fail(&self.pool, row.id, lock_token, &e.to_string()).await?;
                }
            }
        }
    }

    async fn prune(&self, state: QueueJobState, keep: u32) {
        match QueueJobRepo::prune_finished(&self.pool, state, i64::from(keep)).await {
            Ok(0) => {}
            Ok(removed) => {
                tracing::debug!(state = %state, removed, "Pruned finished jobs");
            }
            Err(e) => {
                tracing::warn!(state = %state, error = %e, "Failed to prune finished jobs");
            }
        }
    }
}

fn handle_for(row: &QueueJob, lock_token: Uuid) -> JobHandle {
    JobHandle {
        job_id: row.id,
        execution_id: row.execution_id,
        lock_token,
        attempt: row.attempts_made.max(0) as u32,
        max_attempts: row.max_attempts.max(0) as u32,
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, job: &GenerationJob) -> Result<EnqueueOutcome, QueueError> {
        let payload =
            serde_json::to_value(job).map_err(|e| QueueError::Payload(e.to_string()))?;
        let input = EnqueueJob {
            execution_id: job.execution_id,
            payload,
            max_attempts: self.config.max_attempts as i32,
        };

        let (row, inserted) = QueueJobRepo::enqueue(&self.pool, &input).await?;
        if inserted {
            tracing::info!(job_id = row.id, execution_id = %row.execution_id, "Job enqueued");
        } else {
            tracing::info!(
                job_id = row.id,
                execution_id = %row.execution_id,
                "Job already queued, skipping duplicate",
            );
        }

        Ok(EnqueueOutcome {
            job_id: row.id,
            inserted,
        })
    }

    async fn dequeue(&self, shutdown: &CancellationToken) -> Result<Option<Delivery>, QueueError> {
        loop {
            if shutdown.is_cancelled() {
                return Ok(None);
            }
            if let Some(delivery) = self.try_claim().await? {
                return Ok(Some(delivery));
            }
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(None),
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    async fn ack(&self, handle: &JobHandle) -> Result<(), QueueError> {
        if !QueueJobRepo::complete(&self.pool, handle.job_id, handle.lock_token).await? {
            return Err(QueueError::LeaseLost(handle.job_id));
        }
        self.prune(QueueJobState::Completed, self.config.keep_completed)
            .await;
        Ok(())
    }

    async fn nack(&self, handle: &JobHandle, reason: &str) -> Result<NackOutcome, QueueError> {
        if handle.attempt < handle.max_attempts {
            let delay = self.config.redelivery_delay(handle.attempt);
            let released = QueueJobRepo::retry_later(
                &self.pool,
                handle.job_id,
                handle.lock_token,
                delay,
                reason,
            )
            .await?;
            if !released {
                return Err(QueueError::LeaseLost(handle.job_id));
            }
            return Ok(NackOutcome::Retrying { delay });
        }

        if !QueueJobRepo::fail(&self.pool, handle.job_id, handle.lock_token, reason).await? {
            return Err(QueueError::LeaseLost(handle.job_id));
        }
        self.prune(QueueJobState::Failed, self.config.keep_failed).await;
        Ok(NackOutcome::Exhausted)
    }

    async fn reap_abandoned(&self) -> Result<Vec<Uuid>, QueueError> {
        let reaped = QueueJobRepo::fail_abandoned(&self.pool).await?;
        if !reaped.is_empty() {
            self.prune(QueueJobState::Failed, self.config.keep_failed).await;
        }
        Ok(reaped)
    }
}
