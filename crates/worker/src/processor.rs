//! Batch processor: turns one job into a finalized execution.
//!
//! Prompts run strictly one after another in `batch_index` order. Each
//! item's status is persisted before the next prompt starts, so a
//! redelivered job resumes with the items still `pending` and never
//! repeats finished work.

use std::sync::Arc;
use std::time::{Duration, Instant};

use genbatch_core::failure::{
    ErrorKind, CAUSE_CANCELLED, CAUSE_INTERRUPTED, CAUSE_PROCESSING_INCOMPLETE,
};
use genbatch_core::job::GenerationJob;
use genbatch_core::progress::{item_progress, BatchSummary};
use genbatch_db::models::batch_result::{BatchResult, CompleteBatchResult, FailBatchResult};
use genbatch_db::models::execution::CreateExecution;
use genbatch_db::models::status::{BatchResultStatus, ExecutionStatus};
use genbatch_genapi::{GenerationRequest, ImageGenerator};
use genbatch_storage::{ArtifactStorage, StorageError};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::credentials::CredentialResolver;
use crate::error::WorkerError;
use crate::store::ExecutionStore;

/// Default upload attempts per artifact.
const DEFAULT_UPLOAD_ATTEMPTS: u32 = 3;
/// Default pause between upload attempts.
const DEFAULT_UPLOAD_RETRY_DELAY: Duration = Duration::from_millis(1_000);
/// Default bound on a single upload attempt.
const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Settings and outcomes
// ---------------------------------------------------------------------------

/// Storage retry budget, independent of the generation client's budget.
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub upload_attempts: u32,
    pub upload_retry_delay: Duration,
    pub upload_timeout: Duration,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            upload_attempts: DEFAULT_UPLOAD_ATTEMPTS,
            upload_retry_delay: DEFAULT_UPLOAD_RETRY_DELAY,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
        }
    }
}

impl From<&WorkerConfig> for ProcessorSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            upload_attempts: config.storage_upload_attempts,
            upload_retry_delay: config.storage_retry_delay,
            upload_timeout: config.storage_upload_timeout,
        }
    }
}

/// Result of processing one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The execution was already terminal; nothing was touched.
    AlreadyFinalized,
    Finalized {
        status: ExecutionStatus,
        summary: BatchSummary,
    },
}

/// What happened to a single item.
#[derive(Debug)]
enum ItemOutcome {
    Completed,
    Failed,
    /// Another delivery moved the item first, so this one wrote nothing.
    Skipped,
    /// The failure makes every remaining prompt pointless.
    AbortBatch { cause: String, kind: ErrorKind },
}

// ---------------------------------------------------------------------------
// BatchProcessor
// ---------------------------------------------------------------------------

pub struct BatchProcessor {
    store: Arc<dyn ExecutionStore>,
    generator: Arc<dyn ImageGenerator>,
    storage: Arc<dyn ArtifactStorage>,
    credentials: Arc<dyn CredentialResolver>,
    settings: ProcessorSettings,
}

impl BatchProcessor {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        generator: Arc<dyn ImageGenerator>,
        storage: Arc<dyn ArtifactStorage>,
        credentials: Arc<dyn CredentialResolver>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            store,
            generator,
            storage,
            credentials,
            settings,
        }
    }

    /// Process one delivery of `job`.
    ///
    /// `Ok` means the execution is terminal and the delivery may be acked.
    /// `Err` leaves the execution resumable and the delivery must be
    /// nacked.
    pub async fn process(&self, job: &GenerationJob) -> Result<BatchOutcome, WorkerError> {
        let execution_id = job.execution_id;

        match self.store.find_execution(execution_id).await? {
            Some(existing) if existing.is_terminal() => {
                tracing::info!(
                    execution_id = %execution_id,
                    status = %existing.status,
                    "Execution already finalized, skipping redelivered job",
                );
                return Ok(BatchOutcome::AlreadyFinalized);
            }
            Some(_) => {
                tracing::info!(execution_id = %execution_id, "Resuming execution");
            }
            None => {
                tracing::info!(
                    execution_id = %execution_id,
                    prompts = job.prompt_count(),
                    "Starting execution",
                );
            }
        }

        let api_key = match self.credentials.resolve(job.config.credential_ref).await {
            Ok(key) => Ok(key),
            Err(e) if e.is_fatal() => Err(e.to_string()),
            Err(e) => return Err(e.into()),
        };

        self.store
            .create_execution(&CreateExecution {
                id: execution_id,
                workflow_id: job.workflow_id,
                client_id: job.client_id,
                prompts: job.input_data.prompts.clone(),
            })
            .await?;
        if self.store.start_execution(execution_id).await? {
            tracing::debug!(execution_id = %execution_id, "Execution moved from queued to processing");
        }

        let api_key = match api_key {
            Ok(key) => key,
            Err(cause) => {
                tracing::error!(
                    execution_id = %execution_id,
                    credential_ref = %job.config.credential_ref,
                    error = %cause,
                    "Credential could not be resolved, failing batch",
                );
                self.store
                    .fail_remaining(
                        execution_id,
                        &[BatchResultStatus::Pending],
                        &cause,
                        Some(ErrorKind::Auth.as_str()),
                    )
                    .await?;
                return self.finalize(execution_id, Some(&cause)).await;
            }
        };

        let results = self.store.list_results(execution_id).await?;
        let total = results.len();
        let mut done = results
            .iter()
            .filter(|r| r.status().is_some_and(BatchResultStatus::is_terminal))
            .count();
        let pending: Vec<&BatchResult> = results
            .iter()
            .filter(|r| r.status() == Some(BatchResultStatus::Pending))
            .collect();

        if pending.len() < total {
            tracing::info!(
                execution_id = %execution_id,
                total,
                pending = pending.len(),
                "Skipping items that are no longer pending",
            );
        }

        let mut abort_cause: Option<String> = None;

        for item in pending {
            if self.store.is_cancel_requested(execution_id).await? {
                let cancelled = self
                    .store
                    .fail_remaining(execution_id, &[BatchResultStatus::Pending], CAUSE_CANCELLED, None)
                    .await?;
                tracing::info!(execution_id = %execution_id, cancelled, "Execution cancelled");
                abort_cause = Some(CAUSE_CANCELLED.to_string());
                break;
            }

            match self.process_item(job, &api_key, item).await? {
                ItemOutcome::Completed | ItemOutcome::Failed => {}
                ItemOutcome::Skipped => continue,
                ItemOutcome::AbortBatch { cause, kind } => {
                    let aborted = self
                        .store
                        .fail_remaining(
                            execution_id,
                            &[BatchResultStatus::Pending],
                            &cause,
                            Some(kind.as_str()),
                        )
                        .await?;
                    tracing::error!(
                        execution_id = %execution_id,
                        aborted,
                        kind = %kind,
                        error = %cause,
                        "Aborting remaining items",
                    );
                    abort_cause = Some(cause);
                    break;
                }
            }

            done += 1;
            self.store
                .update_progress(execution_id, item_progress(done, total))
                .await?;
        }

        self.finalize(execution_id, abort_cause.as_deref()).await
    }

    /// Generate, upload and record one pending item.
    async fn process_item(
        &self,
        job: &GenerationJob,
        api_key: &str,
        item: &BatchResult,
    ) -> Result<ItemOutcome, WorkerError> {
        let (execution_id, batch_index) = (item.execution_id, item.batch_index);

        if !self.store.mark_item_processing(execution_id, batch_index).await? {
            tracing::warn!(
                execution_id = %execution_id,
                batch_index,
                "Item left pending state concurrently, skipping",
            );
            return Ok(ItemOutcome::Skipped);
        }

        let started = Instant::now();
        let request = GenerationRequest {
            prompt: &item.prompt_text,
            reference_images: job.reference_images(),
            model: &job.config.model,
            aspect_ratio: &job.config.aspect_ratio,
            resolution: job.config.resolution.as_deref(),
        };

        let image = match self.generator.generate(api_key, &request).await {
            Ok(image) => image,
            Err(e) => {
                tracing::error!(
                    execution_id = %execution_id,
                    batch_index,
                    kind = %e.kind,
                    status_code = ?e.status_code,
                    error = %e.message,
                    "Item generation failed",
                );
                let written = self
                    .store
                    .fail_item(
                        execution_id,
                        batch_index,
                        &FailBatchResult {
                            error_message: e.message.clone(),
                            error_kind: Some(e.kind.as_str().to_string()),
                            processing_time_ms: Some(elapsed_ms(started)),
                        },
                    )
                    .await?;
                return Ok(if e.kind.aborts_batch() {
                    ItemOutcome::AbortBatch {
                        cause: e.message,
                        kind: e.kind,
                    }
                } else if written {
                    ItemOutcome::Failed
                } else {
                    finalized_elsewhere(execution_id, batch_index)
                });
            }
        };

        match self.upload_with_retry(execution_id, batch_index, &image.bytes, &image.mime_type).await {
            Ok(result_url) => {
                let processing_time_ms = elapsed_ms(started);
                let written = self
                    .store
                    .complete_item(
                        execution_id,
                        batch_index,
                        &CompleteBatchResult {
                            result_url: result_url.clone(),
                            mime_type: image.mime_type.clone(),
                            processing_time_ms,
                        },
                    )
                    .await?;
                if !written {
                    return Ok(finalized_elsewhere(execution_id, batch_index));
                }
                tracing::info!(
                    execution_id = %execution_id,
                    batch_index,
                    attempts = image.attempts,
                    processing_time_ms,
                    result_url = %result_url,
                    "Item completed",
                );
                Ok(ItemOutcome::Completed)
            }
            Err(e) => {
                tracing::error!(
                    execution_id = %execution_id,
                    batch_index,
                    error = %e,
                    "Item upload failed",
                );
                let written = self
                    .store
                    .fail_item(
                        execution_id,
                        batch_index,
                        &FailBatchResult {
                            error_message: format!("Storage upload failed: {e}"),
                            error_kind: Some(ErrorKind::Storage.as_str().to_string()),
                            processing_time_ms: Some(elapsed_ms(started)),
                        },
                    )
                    .await?;
                if written {
                    Ok(ItemOutcome::Failed)
                } else {
                    Ok(finalized_elsewhere(execution_id, batch_index))
                }
            }
        }
    }

    /// Upload with a fixed number of attempts and a fixed pause between them.
    async fn upload_with_retry(
        &self,
        execution_id: Uuid,
        batch_index: i32,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, StorageError> {
        let attempts = self.settings.upload_attempts.max(1);
        let mut attempt = 1;

        loop {
            let upload = self.storage.upload(bytes.to_vec(), content_type);
            let result = match tokio::time::timeout(self.settings.upload_timeout, upload).await {
                Ok(result) => result,
                Err(_) => Err(StorageError::Upload(format!(
                    "timed out after {}ms",
                    self.settings.upload_timeout.as_millis()
                ))),
            };

            match result {
                Ok(url) => return Ok(url),
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        execution_id = %execution_id,
                        batch_index,
                        attempt,
                        delay_ms = self.settings.upload_retry_delay.as_millis() as u64,
                        error = %e,
                        "Upload attempt failed, retrying",
                    );
                    tokio::time::sleep(self.settings.upload_retry_delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fail stale `processing` items, then write the terminal status.
    async fn finalize(
        &self,
        execution_id: Uuid,
        abort_cause: Option<&str>,
    ) -> Result<BatchOutcome, WorkerError> {
        let interrupted = self
            .store
            .fail_remaining(
                execution_id,
                &[BatchResultStatus::Processing],
                CAUSE_INTERRUPTED,
                None,
            )
            .await?;
        if interrupted > 0 {
            tracing::warn!(
                execution_id = %execution_id,
                interrupted,
                "Failed items left in processing by an earlier delivery",
            );
        }

        let summary = self.store.summarize(execution_id).await?;
        let (status, error) = if summary.is_success() {
            (ExecutionStatus::Completed, None)
        } else {
            let error = abort_cause
                .map(str::to_owned)
                .unwrap_or_else(|| format!("All {} items failed", summary.total));
            (ExecutionStatus::Failed, Some(error))
        };

        self.write_terminal(execution_id, status, &summary, error.as_deref())
            .await?;
        Ok(BatchOutcome::Finalized { status, summary })
    }

    /// Mark an execution failed after its job exhausted the queue's
    /// attempt budget or was abandoned.
    ///
    /// When the job is known its rows are created first, so even a batch
    /// that never got past setup ends with one failed result per prompt.
    /// Returns `false` if there was nothing left to fail.
    pub async fn fail_execution(
        &self,
        execution_id: Uuid,
        job: Option<&GenerationJob>,
    ) -> Result<bool, WorkerError> {
        if let Some(job) = job {
            self.store
                .create_execution(&CreateExecution {
                    id: execution_id,
                    workflow_id: job.workflow_id,
                    client_id: job.client_id,
                    prompts: job.input_data.prompts.clone(),
                })
                .await?;
        }

        let Some(execution) = self.store.find_execution(execution_id).await? else {
            tracing::warn!(execution_id = %execution_id, "No execution to fail");
            return Ok(false);
        };
        if execution.is_terminal() {
            return Ok(false);
        }

        self.store
            .fail_remaining(
                execution_id,
                &[BatchResultStatus::Pending, BatchResultStatus::Processing],
                CAUSE_PROCESSING_INCOMPLETE,
                None,
            )
            .await?;
        let summary = self.store.summarize(execution_id).await?;
        self.write_terminal(
            execution_id,
            ExecutionStatus::Failed,
            &summary,
            Some(CAUSE_PROCESSING_INCOMPLETE),
        )
        .await
    }

    async fn write_terminal(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        summary: &BatchSummary,
        error: Option<&str>,
    ) -> Result<bool, WorkerError> {
        let written = self
            .store
            .finalize(execution_id, status, summary, error)
            .await?;

        if written {
            tracing::info!(
                execution_id = %execution_id,
                status = %status,
                successful = summary.successful,
                failed = summary.failed,
                total = summary.total,
                "Execution finalized",
            );
        } else {
            tracing::warn!(
                execution_id = %execution_id,
                "Execution was already finalized by another delivery",
            );
        }
        Ok(written)
    }
}

fn elapsed_ms(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}

/// The item reached a terminal status through another delivery while this
/// one was still working on it.
fn finalized_elsewhere(execution_id: Uuid, batch_index: i32) -> ItemOutcome {
    tracing::warn!(
        execution_id = %execution_id,
        batch_index,
        "Item was finalized by another delivery, discarding this result",
    );
    ItemOutcome::Skipped
}
