//! Execution aggregate row.

use genbatch_core::progress::BatchSummary;
use genbatch_core::types::Timestamp;
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::status::ExecutionStatus;

/// A row from the `executions` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Execution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub client_id: Uuid,
    pub status: String,
    pub progress: i16,
    pub started_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub error: Option<String>,
    pub successful_count: Option<i32>,
    pub failed_count: Option<i32>,
    pub total_count: Option<i32>,
    pub cancel_requested_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Execution {
    /// Typed status. Unknown strings cannot occur because of the CHECK
    /// constraint; they are reported as `None`.
    pub fn status(&self) -> Option<ExecutionStatus> {
        ExecutionStatus::parse(&self.status)
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_some_and(ExecutionStatus::is_terminal)
    }

    /// Aggregate counts, present once the execution is finalized.
    pub fn summary(&self) -> Option<BatchSummary> {
        Some(BatchSummary {
            successful: u32::try_from(self.successful_count?).ok()?,
            failed: u32::try_from(self.failed_count?).ok()?,
            total: u32::try_from(self.total_count?).ok()?,
        })
    }
}

/// Input for creating an execution together with its batch results.
#[derive(Debug, Clone)]
pub struct CreateExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub client_id: Uuid,
    pub prompts: Vec<String>,
}
