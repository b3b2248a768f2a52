//! Domain types and pure logic for the batch generation engine.
//!
//! This crate has no internal dependencies so it can be shared by the
//! database layer, the generation client, the queue and the worker.

pub mod crypto;
pub mod error;
pub mod failure;
pub mod generation;
pub mod job;
pub mod progress;
pub mod retry;
pub mod types;
