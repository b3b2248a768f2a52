//! Per-prompt result rows.

use genbatch_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::status::BatchResultStatus;

/// A row from the `batch_results` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BatchResult {
    pub id: DbId,
    pub execution_id: Uuid,
    pub batch_index: i32,
    pub prompt_text: String,
    pub status: String,
    pub result_url: Option<String>,
    pub mime_type: Option<String>,
    pub error_message: Option<String>,
    pub error_kind: Option<String>,
    pub processing_time_ms: Option<i64>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl BatchResult {
    pub fn status(&self) -> Option<BatchResultStatus> {
        BatchResultStatus::parse(&self.status)
    }
}

/// Values written when an item completes.
#[derive(Debug, Clone)]
pub struct CompleteBatchResult {
    pub result_url: String,
    pub mime_type: String,
    pub processing_time_ms: i64,
}

/// Values written when an item fails.
#[derive(Debug, Clone)]
pub struct FailBatchResult {
    pub error_message: String,
    pub error_kind: Option<String>,
    pub processing_time_ms: Option<i64>,
}
