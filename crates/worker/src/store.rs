//! Execution store seam used by the batch processor.
//!
//! [`PgExecutionStore`] delegates to the repositories; every transition is
//! a guarded update, so the `bool` results report whether the row actually
//! moved.

use async_trait::async_trait;
use genbatch_core::progress::BatchSummary;
use genbatch_db::models::batch_result::{BatchResult, CompleteBatchResult, FailBatchResult};
use genbatch_db::models::execution::{CreateExecution, Execution};
use genbatch_db::models::status::{BatchResultStatus, ExecutionStatus};
use genbatch_db::repositories::{BatchResultRepo, ExecutionRepo};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn find_execution(&self, id: Uuid) -> Result<Option<Execution>, StoreError>;

    /// Create the execution and its pending results unless they exist.
    async fn create_execution(&self, input: &CreateExecution) -> Result<Execution, StoreError>;

    /// Move a `queued` execution to `processing`. Returns `false` if it was
    /// in any other status.
    async fn start_execution(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Results in ascending `batch_index` order.
    async fn list_results(&self, execution_id: Uuid) -> Result<Vec<BatchResult>, StoreError>;

    async fn mark_item_processing(
        &self,
        execution_id: Uuid,
        batch_index: i32,
    ) -> Result<bool, StoreError>;

    async fn complete_item(
        &self,
        execution_id: Uuid,
        batch_index: i32,
        input: &CompleteBatchResult,
    ) -> Result<bool, StoreError>;

    async fn fail_item(
        &self,
        execution_id: Uuid,
        batch_index: i32,
        input: &FailBatchResult,
    ) -> Result<bool, StoreError>;

    /// Fail every item in one of `statuses`. Returns how many moved.
    async fn fail_remaining(
        &self,
        execution_id: Uuid,
        statuses: &[BatchResultStatus],
        error_message: &str,
        error_kind: Option<&str>,
    ) -> Result<u64, StoreError>;

    async fn update_progress(&self, execution_id: Uuid, progress: i16) -> Result<bool, StoreError>;

    async fn is_cancel_requested(&self, execution_id: Uuid) -> Result<bool, StoreError>;

    async fn summarize(&self, execution_id: Uuid) -> Result<BatchSummary, StoreError>;

    /// Write the terminal status once. Returns `false` if already terminal.
    async fn finalize(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        summary: &BatchSummary,
        error: Option<&str>,
    ) -> Result<bool, StoreError>;
}

/// [`ExecutionStore`] over Postgres.
pub struct PgExecutionStore {
    pool: PgPool,
}

impl PgExecutionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionStore for PgExecutionStore {
    async fn find_execution(&self, id: Uuid) -> Result<Option<Execution>, StoreError> {
        Ok(ExecutionRepo::find_by_id(&self.pool, id).await?)
    }

    async fn create_execution(&self, input: &CreateExecution) -> Result<Execution, StoreError> {
        Ok(ExecutionRepo::create_with_results(&self.pool, input).await?)
    }

    async fn start_execution(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(ExecutionRepo::mark_processing(&self.pool, id).await?)
    }

    async fn list_results(&self, execution_id: Uuid) -> Result<Vec<BatchResult>, StoreError> {
        Ok(BatchResultRepo::list_by_execution(&self.pool, execution_id).await?)
    }

    async fn mark_item_processing(
        &self,
        execution_id: Uuid,
        batch_index: i32,
    ) -> Result<bool, StoreError> {
        Ok(BatchResultRepo::mark_processing(&self.pool, execution_id, batch_index).await?)
    }

    async fn complete_item(
        &self,
        execution_id: Uuid,
        batch_index: i32,
        input: &CompleteBatchResult,
    ) -> Result<bool, StoreError> {
        Ok(BatchResultRepo::complete(&self.pool, execution_id, batch_index, input).await?)
    }

    async fn fail_item(
        &self,
        execution_id: Uuid,
        batch_index: i32,
        input: &FailBatchResult,
    ) -> Result<bool, StoreError> {
        Ok(BatchResultRepo::fail(&self.pool, execution_id, batch_index, input).await?)
    }

    async fn fail_remaining(
        &self,
        execution_id: Uuid,
        statuses: &[BatchResultStatus],
        error_message: &str,
        error_kind: Option<&str>,
    ) -> Result<u64, StoreError> {
        Ok(BatchResultRepo::fail_remaining(
            &self.pool,
            execution_id,
            statuses,
            error_message,
            error_kind,
        )
        .await?)
    }

    async fn update_progress(&self, execution_id: Uuid, progress: i16) -> Result<bool, StoreError> {
        Ok(ExecutionRepo::update_progress(&self.pool, execution_id, progress).await?)
    }

    async fn is_cancel_requested(&self, execution_id: Uuid) -> Result<bool, StoreError> {
        Ok(ExecutionRepo::is_cancel_requested(&self.pool, execution_id).await?)
    }

    async fn summarize(&self, execution_id: Uuid) -> Result<BatchSummary, StoreError> {
        Ok(BatchResultRepo::summarize(&self.pool, execution_id).await?)
    }

    async fn finalize(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        summary: &BatchSummary,
        error: Option<&str>,
    ) -> Result<bool, StoreError> {
        Ok(ExecutionRepo::finalize(&self.pool, execution_id, status, summary, error).await?)
    }
}
