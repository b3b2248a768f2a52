//! Repository for the `batch_results` table.
//!
//! Items only move forward: `pending -> processing -> completed | failed`,
//! or `pending -> failed` when the batch is aborted. Every transition is a
//! guarded `UPDATE` so a stale or duplicate writer cannot reverse one.

use genbatch_core::progress::BatchSummary;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::batch_result::{BatchResult, CompleteBatchResult, FailBatchResult};
use crate::models::status::BatchResultStatus;

/// Column list for `batch_results` queries.
const COLUMNS: &str = "\
    id, execution_id, batch_index, prompt_text, status, \
    result_url, mime_type, error_message, error_kind, processing_time_ms, \
    started_at, completed_at, created_at, updated_at";

/// Provides per-item state transitions within an execution.
pub struct BatchResultRepo;

impl BatchResultRepo {
    /// All items of an execution in ascending `batch_index` order.
    pub async fn list_by_execution(
        pool: &PgPool,
        execution_id: Uuid,
    ) -> Result<Vec<BatchResult>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM batch_results \
             WHERE execution_id = $1 ORDER BY batch_index ASC"
        );
        sqlx::query_as::<_, BatchResult>(&query)
            .bind(execution_id)
            .fetch_all(pool)
            .await
    }

    /// `pending -> processing`. Returns `false` if the item was not pending.
    pub async fn mark_processing(
        pool: &PgPool,
        execution_id: Uuid,
        batch_index: i32,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE batch_results SET status = $3, started_at = NOW() \
             WHERE execution_id = $1 AND batch_index = $2 AND status = $4",
        )
        .bind(execution_id)
        .bind(batch_index)
        .bind(BatchResultStatus::Processing.as_str())
        .bind(BatchResultStatus::Pending.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// `processing -> completed` with the uploaded artifact URL.
    pub async fn complete(
        pool: &PgPool,
        execution_id: Uuid,
        batch_index: i32,
        input: &CompleteBatchResult,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE batch_results \
             SET status = $3, result_url = $4, mime_type = $5, processing_time_ms = $6, \
                 error_message = NULL, error_kind = NULL, completed_at = NOW() \
             WHERE execution_id = $1 AND batch_index = $2 AND status = $7",
        )
        .bind(execution_id)
        .bind(batch_index)
        .bind(BatchResultStatus::Completed.as_str())
        .bind(&input.result_url)
        .bind(&input.mime_type)
        .bind(input.processing_time_ms)
        .bind(BatchResultStatus::Processing.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// `pending | processing -> failed` for a single item.
    pub async fn fail(
        pool: &PgPool,
        execution_id: Uuid,
        batch_index: i32,
        input: &FailBatchResult,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE batch_results \
             SET status = $3, error_message = $4, error_kind = $5, processing_time_ms = $6, \
                 completed_at = NOW() \
             WHERE execution_id = $1 AND batch_index = $2 AND status IN ($7, $8)",
        )
        .bind(execution_id)
        .bind(batch_index)
        .bind(BatchResultStatus::Failed.as_str())
        .bind(&input.error_message)
        .bind(&input.error_kind)
        .bind(input.processing_time_ms)
        .bind(BatchResultStatus::Pending.as_str())
        .bind(BatchResultStatus::Processing.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Fail every item still in one of `statuses` with the same cause.
    /// Returns the number of items failed.
    pub async fn fail_remaining(
        pool: &PgPool,
        execution_id: Uuid,
        statuses: &[BatchResultStatus],
        error_message: &str,
        error_kind: Option<&str>,
    ) -> Result<u64, sqlx::Error> {
        let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let result = sqlx::query(
            "UPDATE batch_results \
             SET status = $2, error_message = $3, error_kind = $4, completed_at = NOW() \
             WHERE execution_id = $1 AND status = ANY($5)",
        )
        .bind(execution_id)
        .bind(BatchResultStatus::Failed.as_str())
        .bind(error_message)
        .bind(error_kind)
        .bind(&statuses)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Count completed, failed and total items for an execution.
    pub async fn summarize(pool: &PgPool, execution_id: Uuid) -> Result<BatchSummary, sqlx::Error> {
        let (successful, failed, total) = sqlx::query_as::<_, (i64, i64, i64)>(
            "SELECT \
                 COUNT(*) FILTER (WHERE status = $2), \
                 COUNT(*) FILTER (WHERE status = $3), \
                 COUNT(*) \
             FROM batch_results WHERE execution_id = $1",
        )
        .bind(execution_id)
        .bind(BatchResultStatus::Completed.as_str())
        .bind(BatchResultStatus::Failed.as_str())
        .fetch_one(pool)
        .await?;

        Ok(BatchSummary {
            successful: successful as u32,
            failed: failed as u32,
            total: total as u32,
        })
    }
}
