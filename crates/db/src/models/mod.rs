//! Row structs and DTOs.
//!
//! Each submodule contains a `FromRow` entity struct matching the database
//! row plus the input DTO used for inserts.

pub mod batch_result;
pub mod credential;
pub mod execution;
pub mod queue_job;
pub mod status;
