use uuid::Uuid;

/// Errors from the execution store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors from credential resolution.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Credential {0} not found or revoked")]
    NotFound(Uuid),

    #[error("Credential {0} could not be decrypted")]
    Undecryptable(Uuid),

    #[error("Credential could not be sealed: {0}")]
    Seal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl CredentialError {
    /// Whether the reference itself is unusable. Database errors are
    /// transient and leave the job to queue redelivery.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Database(_))
    }
}

/// Errors that abort processing of a delivery before it can be acked.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Credential(#[from] CredentialError),
}
