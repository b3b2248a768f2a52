//! Batch worker: drains the job queue and turns each job into a finalized
//! execution with one result per prompt.

pub mod config;
pub mod credentials;
pub mod error;
pub mod pool;
pub mod processor;
pub mod store;

pub use config::WorkerConfig;
pub use error::WorkerError;
pub use pool::WorkerPool;
pub use processor::{BatchOutcome, BatchProcessor, ProcessorSettings};
