//! Durable queue rows backing the job broker.

use genbatch_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// A row from the `generation_jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct QueueJob {
    pub id: DbId,
    pub execution_id: Uuid,
    pub payload: serde_json::Value,
    pub state: String,
    pub attempts_made: i32,
    pub max_attempts: i32,
    pub available_at: Timestamp,
    pub locked_until: Option<Timestamp>,
    pub lock_token: Option<Uuid>,
    pub last_error: Option<String>,
    pub finished_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Input for enqueueing a job.
#[derive(Debug, Clone)]
pub struct EnqueueJob {
    pub execution_id: Uuid,
    pub payload: serde_json::Value,
    pub max_attempts: i32,
}
