//! In-process queue with the same delivery semantics as the Postgres one.
//!
//! State lives behind a mutex; consumers park on a [`Notify`] between
//! polls so an enqueue wakes an idle worker immediately.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use genbatch_core::job::GenerationJob;
use genbatch_core::types::DbId;
use genbatch_db::models::status::QueueJobState;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{Delivery, EnqueueOutcome, JobHandle, JobQueue, NackOutcome, QueueConfig, QueueError};

#[derive(Debug)]
struct MemoryJob {
    job: GenerationJob,
    state: QueueJobState,
    attempts_made: u32,
    max_attempts: u32,
    available_at: Instant,
    locked_until: Option<Instant>,
    lock_token: Option<Uuid>,
    last_error: Option<String>,
}

impl MemoryJob {
    fn lease_expired(&self, now: Instant) -> bool {
        self.locked_until.is_some_and(|until| until < now)
    }
}

#[derive(Debug, Default)]
struct State {
    next_id: DbId,
    jobs: BTreeMap<DbId, MemoryJob>,
    by_execution: HashMap<Uuid, DbId>,
    completed: VecDeque<DbId>,
    failed: VecDeque<DbId>,
}

impl State {
    fn forget(&mut self, id: DbId) {
        if let Some(entry) = self.jobs.remove(&id) {
            self.by_execution.remove(&entry.job.execution_id);
        }
    }

    fn finish(&mut self, id: DbId, state: QueueJobState, keep: u32) {
        let Some(entry) = self.jobs.get_mut(&id) else {
            return;
        };
        entry.state = state;
        entry.lock_token = None;
        entry.locked_until = None;

        let retained = match state {
            QueueJobState::Completed => &mut self.completed,
            _ => &mut self.failed,
        };
        retained.push_back(id);
        let mut evicted = Vec::new();
        while retained.len() > keep as usize {
            if let Some(old) = retained.pop_front() {
                evicted.push(old);
            }
        }
        for old in evicted {
            self.forget(old);
        }
    }

    fn owned_mut(&mut self, handle: &JobHandle) -> Option<&mut MemoryJob> {
        self.jobs.get_mut(&handle.job_id).filter(|entry| {
            entry.state == QueueJobState::Active && entry.lock_token == Some(handle.lock_token)
        })
    }
}

/// [`JobQueue`] for a single process. Nothing survives a restart.
pub struct MemoryQueue {
    config: QueueConfig,
    state: std::sync::Mutex<State>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            state: std::sync::Mutex::new(State {
                next_id: 1,
                ..Default::default()
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // Every mutation completes under the lock; poisoning is ignored.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of jobs currently in `state`.
    pub fn count(&self, state: QueueJobState) -> usize {
        self.lock().jobs.values().filter(|j| j.state == state).count()
    }

    /// Last recorded error of the job for `execution_id`.
    pub fn last_error(&self, execution_id: Uuid) -> Option<String> {
        let state = self.lock();
        let id = state.by_execution.get(&execution_id)?;
        state.jobs.get(id)?.last_error.clone()
    }

    /// State of the job for `execution_id`, if it is still retained.
    pub fn job_state(&self, execution_id: Uuid) -> Option<QueueJobState> {
        let state = self.lock();
        let id = state.by_execution.get(&execution_id)?;
        state.jobs.get(id).map(|j| j.state)
    }

    /// Claim a deliverable job, or report how long until one may become due.
    fn try_claim(&self) -> Result<Delivery, Option<Instant>> {
        let now = Instant::now();
        let mut state = self.lock();

        let candidate = state
            .jobs
            .iter()
            .filter(|(_, j)| match j.state {
                QueueJobState::Waiting => j.available_at <= now,
                QueueJobState::Active => j.lease_expired(now) && j.attempts_made < j.max_attempts,
                _ => false,
            })
            .min_by_key(|(id, j)| (j.available_at, **id))
            .map(|(id, _)| *id);

        let Some(id) = candidate else {
            let next_due = state
                .jobs
                .values()
                .filter(|j| j.state == QueueJobState::Waiting)
                .map(|j| j.available_at)
                .min();
            return Err(next_due);
        };

        let lock_token = Uuid::new_v4();
        let Some(entry) = state.jobs.get_mut(&id) else {
            return Err(None);
        };
        entry.state = QueueJobState::Active;
        entry.attempts_made += 1;
        entry.lock_token = Some(lock_token);
        entry.locked_until = Some(now + self.config.visibility_timeout);

        Ok(Delivery {
            handle: JobHandle {
                job_id: id,
                execution_id: entry.job.execution_id,
                lock_token,
                attempt: entry.attempts_made,
                max_attempts: entry.max_attempts,
            },
            job: entry.job.clone(),
        })
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, job: &GenerationJob) -> Result<EnqueueOutcome, QueueError> {
        let outcome = {
            let mut state = self.lock();
            if let Some(&job_id) = state.by_execution.get(&job.execution_id) {
                EnqueueOutcome {
                    job_id,
                    inserted: false,
                }
            } else {
                let job_id = state.next_id;
                state.next_id += 1;
                state.by_execution.insert(job.execution_id, job_id);
                state.jobs.insert(
                    job_id,
                    MemoryJob {
                        job: job.clone(),
                        state: QueueJobState::Waiting,
                        attempts_made: 0,
                        max_attempts: self.config.max_attempts,
                        available_at: Instant::now(),
                        locked_until: None,
                        lock_token: None,
                        last_error: None,
                    },
                );
                EnqueueOutcome {
                    job_id,
                    inserted: true,
                }
            }
        };

        if outcome.inserted {
            tracing::info!(job_id = outcome.job_id, execution_id = %job.execution_id, "Job enqueued");
            self.notify.notify_one();
        } else {
            tracing::info!(
                job_id = outcome.job_id,
                execution_id = %job.execution_id,
                "Job already queued, skipping duplicate",
            );
        }
        Ok(outcome)
    }

    async fn dequeue(&self, shutdown: &CancellationToken) -> Result<Option<Delivery>, QueueError> {
        loop {
            if shutdown.is_cancelled() {
                return Ok(None);
            }

            let wait = match self.try_claim() {
                Ok(delivery) => return Ok(Some(delivery)),
                Err(Some(next_due)) => next_due
                    .saturating_duration_since(Instant::now())
                    .min(self.config.poll_interval),
                Err(None) => self.config.poll_interval,
            };

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(None),
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    async fn ack(&self, handle: &JobHandle) -> Result<(), QueueError> {
        let mut state = self.lock();
        if state.owned_mut(handle).is_none() {
            return Err(QueueError::LeaseLost(handle.job_id));
        }
        state.finish(handle.job_id, QueueJobState::Completed, self.config.keep_completed);
        Ok(())
    }

    async fn nack(&self, handle: &JobHandle, reason: &str) -> Result<NackOutcome, QueueError> {
        let outcome = {
            let mut state = self.lock();
            let Some(entry) = state.owned_mut(handle) else {
                return Err(QueueError::LeaseLost(handle.job_id));
            };
            entry.last_error = Some(reason.to_string());

            if handle.attempt < handle.max_attempts {
                let delay = self.config.redelivery_delay(entry.attempts_made);
                entry.state = QueueJobState::Waiting;
                entry.available_at = Instant::now() + delay;
                entry.lock_token = None;
                entry.locked_until = None;
                NackOutcome::Retrying { delay }
            } else {
                state.finish(handle.job_id, QueueJobState::Failed, self.config.keep_failed);
                NackOutcome::Exhausted
            }
        };

        if matches!(outcome, NackOutcome::Retrying { .. }) {
            self.notify.notify_one();
        }
        Ok(outcome)
    }

    async fn reap_abandoned(&self) -> Result<Vec<Uuid>, QueueError> {
        let now = Instant::now();
        let mut state = self.lock();

        let abandoned: Vec<(DbId, Uuid)> = state
            .jobs
            .iter()
            .filter(|(_, j)| {
                j.state == QueueJobState::Active
                    && j.lease_expired(now)
                    && j.attempts_made >= j.max_attempts
            })
            .map(|(id, j)| (*id, j.job.execution_id))
            .collect();

        for (id, _) in &abandoned {
            if let Some(entry) = state.jobs.get_mut(id) {
                entry.last_error = Some("visibility timeout expired".to_string());
            }
            state.finish(*id, QueueJobState::Failed, self.config.keep_failed);
        }

        Ok(abandoned.into_iter().map(|(_, execution_id)| execution_id).collect())
    }
}
