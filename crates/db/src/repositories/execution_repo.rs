//! Repository for the `executions` table.
//!
//! An execution and its batch results are created together, once, on the
//! first delivery of a job. After that only guarded transitions apply:
//! progress never decreases and a terminal status is written exactly once.

use genbatch_core::progress::{BatchSummary, FINAL_PROGRESS};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::execution::{CreateExecution, Execution};
use crate::models::status::{BatchResultStatus, ExecutionStatus};

/// Column list for `executions` queries.
const COLUMNS: &str = "\
    id, workflow_id, client_id, status, progress, \
    started_at, completed_at, error, \
    successful_count, failed_count, total_count, \
    cancel_requested_at, created_at, updated_at";

/// Provides state transitions for execution aggregates.
pub struct ExecutionRepo;

impl ExecutionRepo {
    /// Create the execution (status `processing`, progress 0) and one
    /// `pending` batch result per prompt in a single transaction.
    ///
    /// Both inserts ignore conflicts, so a racing duplicate delivery can
    /// never produce a second set of rows. Returns the stored execution.
    pub async fn create_with_results(
        pool: &PgPool,
        input: &CreateExecution,
    ) -> Result<Execution, sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query(
            "INSERT INTO executions (id, workflow_id, client_id, status, progress, started_at) \
             VALUES ($1, $2, $3, $4, 0, NOW()) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(input.id)
        .bind(input.workflow_id)
        .bind(input.client_id)
        .bind(ExecutionStatus::Processing.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO batch_results (execution_id, batch_index, prompt_text, status) \
             SELECT $1, (t.idx - 1)::INTEGER, t.prompt, $3 \
             FROM UNNEST($2::TEXT[]) WITH ORDINALITY AS t(prompt, idx) \
             ON CONFLICT (execution_id, batch_index) DO NOTHING",
        )
        .bind(input.id)
        .bind(&input.prompts)
        .bind(BatchResultStatus::Pending.as_str())
        .execute(&mut *tx)
        .await?;

        let query = format!("SELECT {COLUMNS} FROM executions WHERE id = $1");
        let execution = sqlx::query_as::<_, Execution>(&query)
            .bind(input.id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(execution)
    }

    /// Find an execution by its ID.
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Execution>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM executions WHERE id = $1");
        sqlx::query_as::<_, Execution>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Move a `queued` execution to `processing`. Returns `false` if the
    /// execution was not queued.
    pub async fn mark_processing(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE executions SET status = $2 WHERE id = $1 AND status = $3",
        )
        .bind(id)
        .bind(ExecutionStatus::Processing.as_str())
        .bind(ExecutionStatus::Queued.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Raise progress of a processing execution. Lower values are ignored.
    pub async fn update_progress(
        pool: &PgPool,
        id: Uuid,
        progress: i16,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE executions SET progress = GREATEST(progress, $2) \
             WHERE id = $1 AND status = $3",
        )
        .bind(id)
        .bind(progress)
        .bind(ExecutionStatus::Processing.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Write the terminal status, progress 100 and aggregate counts.
    ///
    /// Returns `false` if the execution was already terminal.
    pub async fn finalize(
        pool: &PgPool,
        id: Uuid,
        status: ExecutionStatus,
        summary: &BatchSummary,
        error: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE executions \
             SET status = $2, progress = $3, completed_at = NOW(), error = $4, \
                 successful_count = $5, failed_count = $6, total_count = $7 \
             WHERE id = $1 AND status IN ($8, $9)",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(FINAL_PROGRESS)
        .bind(error)
        .bind(summary.successful as i32)
        .bind(summary.failed as i32)
        .bind(summary.total as i32)
        .bind(ExecutionStatus::Queued.as_str())
        .bind(ExecutionStatus::Processing.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Flag a running execution for cancellation. The worker honours the
    /// flag between prompts. Returns `false` if the execution is terminal.
    pub async fn request_cancel(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE executions SET cancel_requested_at = COALESCE(cancel_requested_at, NOW()) \
             WHERE id = $1 AND status IN ($2, $3)",
        )
        .bind(id)
        .bind(ExecutionStatus::Queued.as_str())
        .bind(ExecutionStatus::Processing.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Whether cancellation has been requested for the execution.
    pub async fn is_cancel_requested(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let requested = sqlx::query_scalar::<_, bool>(
            "SELECT cancel_requested_at IS NOT NULL FROM executions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(requested.unwrap_or(false))
    }
}
