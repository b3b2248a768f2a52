//! Repository for the `generation_jobs` table, the durable job broker.
//!
//! Jobs are claimed with `SELECT FOR UPDATE SKIP LOCKED` so concurrent
//! workers never receive the same delivery. A claim holds a lease
//! (`locked_until`) identified by `lock_token`; an expired lease makes the
//! job claimable again while attempts remain.

use std::time::Duration;

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::queue_job::{EnqueueJob, QueueJob};
use crate::models::status::QueueJobState;

/// Column list for `generation_jobs` queries.
const COLUMNS: &str = "\
    id, execution_id, payload, state, attempts_made, max_attempts, \
    available_at, locked_until, lock_token, last_error, finished_at, \
    created_at, updated_at";

/// Error recorded on jobs whose lease expired with no attempts left.
const ABANDONED_ERROR: &str = "visibility timeout expired";

/// Provides broker operations over queued jobs.
pub struct QueueJobRepo;

impl QueueJobRepo {
    /// Insert a waiting job keyed by `execution_id`.
    ///
    /// If a job for the same execution already exists it is returned
    /// unchanged and the boolean is `false`.
    pub async fn enqueue(
        pool: &PgPool,
        input: &EnqueueJob,
    ) -> Result<(QueueJob, bool), sqlx::Error> {
        let query = format!(
            "INSERT INTO generation_jobs (execution_id, payload, state, max_attempts) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (execution_id) DO NOTHING \
             RETURNING {COLUMNS}"
        );
        let inserted = sqlx::query_as::<_, QueueJob>(&query)
            .bind(input.execution_id)
            .bind(&input.payload)
            .bind(QueueJobState::Waiting.as_str())
            .bind(input.max_attempts)
            .fetch_optional(pool)
            .await?;

        match inserted {
            Some(job) => Ok((job, true)),
            None => {
                let existing = Self::find_by_execution_id(pool, input.execution_id)
                    .await?
                    .ok_or(sqlx::Error::RowNotFound)?;
                Ok((existing, false))
            }
        }
    }

    /// Atomically claim the next deliverable job under a fresh lease.
    ///
    /// Deliverable means `waiting` and due, or `active` with an expired
    /// lease and attempts remaining. Increments `attempts_made`.
    pub async fn claim_next(
        pool: &PgPool,
        lock_token: Uuid,
        lease: Duration,
    ) -> Result<Option<QueueJob>, sqlx::Error> {
        let query = format!(
            "UPDATE generation_jobs \
             SET state = $1, attempts_made = attempts_made + 1, lock_token = $2, \
                 locked_until = NOW() + make_interval(secs => $3) \
             WHERE id = ( \
                 SELECT id FROM generation_jobs \
                 WHERE (state = $4 AND available_at <= NOW()) \
                    OR (state = $1 AND locked_until < NOW() AND attempts_made < max_attempts) \
                 ORDER BY available_at ASC, id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, QueueJob>(&query)
            .bind(QueueJobState::Active.as_str())
            .bind(lock_token)
            .bind(lease.as_secs_f64())
            .bind(QueueJobState::Waiting.as_str())
            .fetch_optional(pool)
            .await
    }

    /// Mark a claimed job completed. Returns `false` if the lease was lost.
    pub async fn complete(pool: &PgPool, id: i64, lock_token: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE generation_jobs \
             SET state = $3, finished_at = NOW(), lock_token = NULL, locked_until = NULL \
             WHERE id = $1 AND lock_token = $2 AND state = $4",
        )
        .bind(id)
        .bind(lock_token)
        .bind(QueueJobState::Completed.as_str())
        .bind(QueueJobState::Active.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Release a claimed job back to `waiting`, deliverable after `delay`.
    pub async fn retry_later(
        pool: &PgPool,
        id: i64,
        lock_token: Uuid,
        delay: Duration,
        error: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE generation_jobs \
             SET state = $3, available_at = NOW() + make_interval(secs => $4), \
                 last_error = $5, lock_token = NULL, locked_until = NULL \
             WHERE id = $1 AND lock_token = $2 AND state = $6",
        )
        .bind(id)
        .bind(lock_token)
        .bind(QueueJobState::Waiting.as_str())
        .bind(delay.as_secs_f64())
        .bind(error)
        .bind(QueueJobState::Active.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a claimed job permanently failed.
    pub async fn fail(
        pool: &PgPool,
        id: i64,
        lock_token: Uuid,
        error: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE generation_jobs \
             SET state = $3, last_error = $4, finished_at = NOW(), \
                 lock_token = NULL, locked_until = NULL \
             WHERE id = $1 AND lock_token = $2 AND state = $5",
        )
        .bind(id)
        .bind(lock_token)
        .bind(QueueJobState::Failed.as_str())
        .bind(error)
        .bind(QueueJobState::Active.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Fail active jobs whose lease expired with no attempts left.
    /// Returns the affected execution IDs.
    pub async fn fail_abandoned(pool: &PgPool) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar::<_, Uuid>(
            "UPDATE generation_jobs \
             SET state = $1, last_error = $2, finished_at = NOW(), \
                 lock_token = NULL, locked_until = NULL \
             WHERE state = $3 AND locked_until < NOW() AND attempts_made >= max_attempts \
             RETURNING execution_id",
        )
        .bind(QueueJobState::Failed.as_str())
        .bind(ABANDONED_ERROR)
        .bind(QueueJobState::Active.as_str())
        .fetch_all(pool)
        .await
    }

    /// Delete the oldest finished jobs in `state`, keeping the newest `keep`.
    pub async fn prune_finished(
        pool: &PgPool,
        state: QueueJobState,
        keep: i64,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM generation_jobs WHERE id IN ( \
                 SELECT id FROM generation_jobs WHERE state = $1 \
                 ORDER BY finished_at DESC, id DESC \
                 OFFSET $2 \
             )",
        )
        .bind(state.as_str())
        .bind(keep)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Find the job for an execution.
    pub async fn find_by_execution_id(
        pool: &PgPool,
        execution_id: Uuid,
    ) -> Result<Option<QueueJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM generation_jobs WHERE execution_id = $1");
        sqlx::query_as::<_, QueueJob>(&query)
            .bind(execution_id)
            .fetch_optional(pool)
            .await
    }

    /// Number of jobs per state, for diagnostics.
    pub async fn count_by_state(pool: &PgPool) -> Result<Vec<(String, i64)>, sqlx::Error> {
        sqlx::query_as::<_, (String, i64)>(
            "SELECT state, COUNT(*) FROM generation_jobs GROUP BY state ORDER BY state",
        )
        .fetch_all(pool)
        .await
    }
}
