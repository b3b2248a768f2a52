use genbatch_core::types::DbId;

/// Errors from queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid job payload: {0}")]
    Payload(String),

    /// The delivery's lease expired and the job moved on.
    #[error("Lease lost for job {0}")]
    LeaseLost(DbId),
}
