//! In-memory collaborators for driving the batch processor in tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use genbatch_core::failure::ErrorKind;
use genbatch_core::job::{GenerationJob, JobConfig, JobInput};
use genbatch_core::progress::{BatchSummary, FINAL_PROGRESS};
use genbatch_db::models::batch_result::{BatchResult, CompleteBatchResult, FailBatchResult};
use genbatch_db::models::execution::{CreateExecution, Execution};
use genbatch_db::models::status::{BatchResultStatus, ExecutionStatus};
use genbatch_genapi::{GeneratedImage, GenerationError, GenerationRequest, ImageGenerator};
use genbatch_storage::{ArtifactStorage, StorageError};
use genbatch_worker::credentials::CredentialResolver;
use genbatch_worker::error::{CredentialError, StoreError};
use genbatch_worker::store::ExecutionStore;
use genbatch_worker::{BatchProcessor, ProcessorSettings};
use uuid::Uuid;

pub const API_KEY: &str = "test-api-key";

pub fn job(prompts: &[&str]) -> GenerationJob {
    GenerationJob {
        execution_id: Uuid::now_v7(),
        workflow_id: Uuid::now_v7(),
        client_id: Uuid::now_v7(),
        user_id: Uuid::now_v7(),
        input_data: JobInput {
            prompts: prompts.iter().map(|p| p.to_string()).collect(),
            reference_images: None,
        },
        config: JobConfig {
            credential_ref: Uuid::now_v7(),
            model: "gemini-2.5-flash-image".into(),
            aspect_ratio: "1:1".into(),
            resolution: None,
        },
    }
}

pub fn create_input(job: &GenerationJob) -> CreateExecution {
    CreateExecution {
        id: job.execution_id,
        workflow_id: job.workflow_id,
        client_id: job.client_id,
        prompts: job.input_data.prompts.clone(),
    }
}

pub fn settings() -> ProcessorSettings {
    ProcessorSettings {
        upload_attempts: 3,
        upload_retry_delay: Duration::from_millis(5),
        upload_timeout: Duration::from_secs(2),
    }
}

/// Every collaborator of one processor, kept for inspection.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub generator: Arc<FakeGenerator>,
    pub storage: Arc<FakeStorage>,
    pub credentials: Arc<FakeCredentials>,
    pub processor: Arc<BatchProcessor>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(FakeGenerator::default(), FakeStorage::default(), FakeCredentials::valid())
    }

    pub fn with(generator: FakeGenerator, storage: FakeStorage, credentials: FakeCredentials) -> Self {
        let store = Arc::new(MemoryStore::default());
        let generator = Arc::new(generator);
        let storage = Arc::new(storage);
        let credentials = Arc::new(credentials);
        let processor = Arc::new(BatchProcessor::new(
            store.clone(),
            generator.clone(),
            storage.clone(),
            credentials.clone(),
            settings(),
        ));
        Self {
            store,
            generator,
            storage,
            credentials,
            processor,
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreState {
    next_id: i64,
    executions: HashMap<Uuid, Execution>,
    results: BTreeMap<(Uuid, i32), BatchResult>,
    progress_updates: Vec<i16>,
}

/// [`ExecutionStore`] with the same guarded transitions as the Postgres
/// repositories.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    list_failures: AtomicU32,
    cancel_after_items: Mutex<Option<usize>>,
    finished_elsewhere: Mutex<Option<i32>>,
}

impl MemoryStore {
    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap()
    }

    pub fn execution(&self, id: Uuid) -> Option<Execution> {
        self.lock().executions.get(&id).cloned()
    }

    pub fn results(&self, execution_id: Uuid) -> Vec<BatchResult> {
        self.lock()
            .results
            .range((execution_id, i32::MIN)..=(execution_id, i32::MAX))
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn statuses(&self, execution_id: Uuid) -> Vec<BatchResultStatus> {
        self.results(execution_id)
            .iter()
            .map(|r| r.status().unwrap())
            .collect()
    }

    pub fn progress_updates(&self) -> Vec<i16> {
        self.lock().progress_updates.clone()
    }

    /// Force an item into `status`, as an earlier delivery would have.
    pub fn set_item_status(&self, execution_id: Uuid, batch_index: i32, status: BatchResultStatus) {
        let mut state = self.lock();
        let row = state.results.get_mut(&(execution_id, batch_index)).unwrap();
        row.status = status.as_str().to_string();
        if status == BatchResultStatus::Completed {
            row.result_url = Some(format!("https://cdn.test/earlier/{batch_index}.png"));
            row.mime_type = Some("image/png".into());
        }
    }

    /// Force the execution into a terminal status.
    pub fn set_execution_status(&self, execution_id: Uuid, status: ExecutionStatus) {
        let mut state = self.lock();
        state.executions.get_mut(&execution_id).unwrap().status = status.as_str().to_string();
    }

    pub fn request_cancel(&self, execution_id: Uuid) {
        let mut state = self.lock();
        if let Some(execution) = state.executions.get_mut(&execution_id) {
            execution.cancel_requested_at.get_or_insert_with(Utc::now);
        }
    }

    /// Request cancellation once `items` progress updates were written.
    pub fn cancel_after_items(&self, items: usize) {
        *self.cancel_after_items.lock().unwrap() = Some(items);
    }

    /// Let another delivery complete `batch_index` right after this one
    /// claims it.
    pub fn finish_elsewhere(&self, batch_index: i32) {
        *self.finished_elsewhere.lock().unwrap() = Some(batch_index);
    }

    /// Make the next `n` calls to `list_results` fail.
    pub fn fail_list_results(&self, n: u32) {
        self.list_failures.store(n, Ordering::SeqCst);
    }
}

fn guarded_item<'a>(
    state: &'a mut StoreState,
    execution_id: Uuid,
    batch_index: i32,
    from: &[BatchResultStatus],
) -> Option<&'a mut BatchResult> {
    state
        .results
        .get_mut(&(execution_id, batch_index))
        .filter(|r| r.status().is_some_and(|s| from.contains(&s)))
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn find_execution(&self, id: Uuid) -> Result<Option<Execution>, StoreError> {
        Ok(self.execution(id))
    }

    async fn create_execution(&self, input: &CreateExecution) -> Result<Execution, StoreError> {
        let mut state = self.lock();
        let now = Utc::now();
        state.executions.entry(input.id).or_insert_with(|| Execution {
            id: input.id,
            workflow_id: input.workflow_id,
            client_id: input.client_id,
            status: ExecutionStatus::Processing.as_str().to_string(),
            progress: 0,
            started_at: now,
            completed_at: None,
            error: None,
            successful_count: None,
            failed_count: None,
            total_count: None,
            cancel_requested_at: None,
            created_at: now,
            updated_at: now,
        });

        for (index, prompt) in input.prompts.iter().enumerate() {
            let key = (input.id, index as i32);
            if state.results.contains_key(&key) {
                continue;
            }
            state.next_id += 1;
            let id = state.next_id;
            state.results.insert(
                key,
                BatchResult {
                    id,
                    execution_id: input.id,
                    batch_index: index as i32,
                    prompt_text: prompt.clone(),
                    status: BatchResultStatus::Pending.as_str().to_string(),
                    result_url: None,
                    mime_type: None,
                    error_message: None,
                    error_kind: None,
                    processing_time_ms: None,
                    started_at: None,
                    completed_at: None,
                    created_at: now,
                    updated_at: now,
                },
            );
        }

        Ok(state.executions[&input.id].clone())
    }

    async fn start_execution(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.lock();
        let Some(execution) = state.executions.get_mut(&id) else {
            return Ok(false);
        };
        if execution.status() != Some(ExecutionStatus::Queued) {
            return Ok(false);
        }
        execution.status = ExecutionStatus::Processing.as_str().to_string();
        Ok(true)
    }

    async fn list_results(&self, execution_id: Uuid) -> Result<Vec<BatchResult>, StoreError> {
        let failing = self
            .list_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(self.results(execution_id))
    }

    async fn mark_item_processing(
        &self,
        execution_id: Uuid,
        batch_index: i32,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock();
        let Some(row) =
            guarded_item(&mut state, execution_id, batch_index, &[BatchResultStatus::Pending])
        else {
            return Ok(false);
        };
        row.status = BatchResultStatus::Processing.as_str().to_string();
        row.started_at = Some(Utc::now());

        if *self.finished_elsewhere.lock().unwrap() == Some(batch_index) {
            row.status = BatchResultStatus::Completed.as_str().to_string();
            row.result_url = Some(format!("https://cdn.test/elsewhere/{batch_index}.png"));
            row.mime_type = Some("image/png".into());
            row.completed_at = Some(Utc::now());
        }
        Ok(true)
    }

    async fn complete_item(
        &self,
        execution_id: Uuid,
        batch_index: i32,
        input: &CompleteBatchResult,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock();
        let Some(row) =
            guarded_item(&mut state, execution_id, batch_index, &[BatchResultStatus::Processing])
        else {
            return Ok(false);
        };
        row.status = BatchResultStatus::Completed.as_str().to_string();
        row.result_url = Some(input.result_url.clone());
        row.mime_type = Some(input.mime_type.clone());
        row.processing_time_ms = Some(input.processing_time_ms);
        row.completed_at = Some(Utc::now());
        Ok(true)
    }

    async fn fail_item(
        &self,
        execution_id: Uuid,
        batch_index: i32,
        input: &FailBatchResult,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock();
        let Some(row) = guarded_item(
            &mut state,
            execution_id,
            batch_index,
            &[BatchResultStatus::Pending, BatchResultStatus::Processing],
        ) else {
            return Ok(false);
        };
        row.status = BatchResultStatus::Failed.as_str().to_string();
        row.error_message = Some(input.error_message.clone());
        row.error_kind = input.error_kind.clone();
        row.processing_time_ms = input.processing_time_ms;
        row.completed_at = Some(Utc::now());
        Ok(true)
    }

    async fn fail_remaining(
        &self,
        execution_id: Uuid,
        statuses: &[BatchResultStatus],
        error_message: &str,
        error_kind: Option<&str>,
    ) -> Result<u64, StoreError> {
        let mut state = self.lock();
        let mut moved = 0;
        for row in state
            .results
            .range_mut((execution_id, i32::MIN)..=(execution_id, i32::MAX))
            .map(|(_, r)| r)
            .filter(|r| r.status().is_some_and(|s| statuses.contains(&s)))
        {
            row.status = BatchResultStatus::Failed.as_str().to_string();
            row.error_message = Some(error_message.to_string());
            row.error_kind = error_kind.map(str::to_owned);
            row.completed_at = Some(Utc::now());
            moved += 1;
        }
        Ok(moved)
    }

    async fn update_progress(&self, execution_id: Uuid, progress: i16) -> Result<bool, StoreError> {
        let mut state = self.lock();
        let Some(execution) = state.executions.get_mut(&execution_id) else {
            return Ok(false);
        };
        if execution.status() != Some(ExecutionStatus::Processing) {
            return Ok(false);
        }
        execution.progress = execution.progress.max(progress);
        state.progress_updates.push(progress);
        let updates = state.progress_updates.len();

        if *self.cancel_after_items.lock().unwrap() == Some(updates) {
            if let Some(execution) = state.executions.get_mut(&execution_id) {
                execution.cancel_requested_at.get_or_insert_with(Utc::now);
            }
        }
        Ok(true)
    }

    async fn is_cancel_requested(&self, execution_id: Uuid) -> Result<bool, StoreError> {
        Ok(self
            .execution(execution_id)
            .is_some_and(|e| e.cancel_requested_at.is_some()))
    }

    async fn summarize(&self, execution_id: Uuid) -> Result<BatchSummary, StoreError> {
        let statuses = self.statuses(execution_id);
        let count = |wanted: BatchResultStatus| statuses.iter().filter(|&&s| s == wanted).count() as u32;
        Ok(BatchSummary {
            successful: count(BatchResultStatus::Completed),
            failed: count(BatchResultStatus::Failed),
            total: statuses.len() as u32,
        })
    }

    async fn finalize(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        summary: &BatchSummary,
        error: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock();
        let Some(execution) = state.executions.get_mut(&execution_id) else {
            return Ok(false);
        };
        if execution.is_terminal() {
            return Ok(false);
        }
        execution.status = status.as_str().to_string();
        execution.progress = FINAL_PROGRESS;
        execution.completed_at = Some(Utc::now());
        execution.error = error.map(str::to_owned);
        execution.successful_count = Some(summary.successful as i32);
        execution.failed_count = Some(summary.failed as i32);
        execution.total_count = Some(summary.total as i32);
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// FakeGenerator
// ---------------------------------------------------------------------------

/// Succeeds for every prompt unless a result was scripted for it.
#[derive(Default)]
pub struct FakeGenerator {
    scripted: Mutex<HashMap<String, VecDeque<Result<GeneratedImage, GenerationError>>>>,
    prompts: Mutex<Vec<String>>,
    api_keys: Mutex<Vec<String>>,
}

impl FakeGenerator {
    pub fn fail_prompt(self, prompt: &str, error: GenerationError) -> Self {
        self.scripted
            .lock()
            .unwrap()
            .entry(prompt.to_string())
            .or_default()
            .push_back(Err(error));
        self
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn api_keys(&self) -> Vec<String> {
        self.api_keys.lock().unwrap().clone()
    }
}

pub fn image() -> GeneratedImage {
    GeneratedImage {
        bytes: vec![0x89, b'P', b'N', b'G'],
        mime_type: "image/png".into(),
        processing_time_ms: 12,
        attempts: 1,
    }
}

pub fn http_error(status: u16, message: &str) -> GenerationError {
    GenerationError::from_status(status, message)
}

pub fn error(kind: ErrorKind, message: &str) -> GenerationError {
    GenerationError::new(kind, message)
}

#[async_trait]
impl ImageGenerator for FakeGenerator {
    async fn generate(
        &self,
        api_key: &str,
        request: &GenerationRequest<'_>,
    ) -> Result<GeneratedImage, GenerationError> {
        self.prompts.lock().unwrap().push(request.prompt.to_string());
        self.api_keys.lock().unwrap().push(api_key.to_string());
        self.scripted
            .lock()
            .unwrap()
            .get_mut(request.prompt)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(image()))
    }
}

// ---------------------------------------------------------------------------
// FakeStorage
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeStorage {
    failures: AtomicU32,
    uploads: AtomicU32,
}

impl FakeStorage {
    /// Fail the next `n` upload attempts.
    pub fn failing(n: u32) -> Self {
        Self {
            failures: AtomicU32::new(n),
            uploads: AtomicU32::new(0),
        }
    }

    pub fn uploads(&self) -> u32 {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactStorage for FakeStorage {
    async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, StorageError> {
        let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| f.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StorageError::Upload("bucket unavailable".into()));
        }
        assert!(!bytes.is_empty());
        assert_eq!(content_type, "image/png");
        Ok(format!("https://cdn.test/generated/{n}.png"))
    }
}

// ---------------------------------------------------------------------------
// FakeCredentials
// ---------------------------------------------------------------------------

pub struct FakeCredentials {
    secret: Option<String>,
}

impl FakeCredentials {
    pub fn valid() -> Self {
        Self {
            secret: Some(API_KEY.to_string()),
        }
    }

    pub fn missing() -> Self {
        Self { secret: None }
    }
}

#[async_trait]
impl CredentialResolver for FakeCredentials {
    async fn resolve(&self, credential_ref: Uuid) -> Result<String, CredentialError> {
        self.secret
            .clone()
            .ok_or(CredentialError::NotFound(credential_ref))
    }
}
