//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument. State transitions are guarded in
//! SQL and report whether a row actually moved.

pub mod batch_result_repo;
pub mod credential_repo;
pub mod execution_repo;
pub mod queue_job_repo;

pub use batch_result_repo::BatchResultRepo;
pub use credential_repo::CredentialRepo;
pub use execution_repo::ExecutionRepo;
pub use queue_job_repo::QueueJobRepo;
