//! Progress and outcome arithmetic for a batch execution.

use serde::{Deserialize, Serialize};

/// Progress ceiling while items are still being processed. The remainder is
/// only reported once the execution has been finalized.
pub const PROCESSING_PROGRESS_CEILING: i16 = 90;

/// Progress of a finalized execution.
pub const FINAL_PROGRESS: i16 = 100;

/// `floor(done / total * 90)`; zero for an empty batch.
pub fn item_progress(done: usize, total: usize) -> i16 {
    if total == 0 {
        return 0;
    }
    let done = done.min(total) as u64;
    (done * PROCESSING_PROGRESS_CEILING as u64 / total as u64) as i16
}

/// Aggregate counts persisted on the execution when it is finalized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub successful: u32,
    pub failed: u32,
    pub total: u32,
}

impl BatchSummary {
    /// An execution is completed when at least one item succeeded.
    pub fn is_success(&self) -> bool {
        self.successful > 0
    }

    pub fn is_consistent(&self) -> bool {
        self.successful + self.failed == self.total
    }
}
