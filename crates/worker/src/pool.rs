//! Fixed-size pool of worker loops plus the abandoned-job reaper.
//!
//! Each loop holds one job at a time; the pool size therefore bounds the
//! number of concurrent calls against the generation API. Shutdown is
//! cooperative: a loop finishes its current job before it exits.

use std::sync::Arc;
use std::time::Duration;

use genbatch_queue::{Delivery, JobQueue, NackOutcome};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::processor::{BatchOutcome, BatchProcessor};

/// Pause after a failed dequeue before polling again.
const DEQUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    processor: Arc<BatchProcessor>,
    size: usize,
    reaper_interval: Duration,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        processor: Arc<BatchProcessor>,
        size: usize,
        reaper_interval: Duration,
    ) -> Self {
        Self {
            queue,
            processor,
            size: size.max(1),
            reaper_interval,
        }
    }

    /// Run every loop until `shutdown` is cancelled and all in-flight jobs
    /// have been acknowledged or released.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        tracing::info!(
            size = self.size,
            reaper_interval_secs = self.reaper_interval.as_secs(),
            "Worker pool started",
        );

        let mut tasks = JoinSet::new();
        for worker_id in 0..self.size {
            let pool = Arc::clone(&self);
            let shutdown = shutdown.clone();
            tasks.spawn(async move { pool.worker_loop(worker_id, shutdown).await });
        }
        {
            let pool = Arc::clone(&self);
            let shutdown = shutdown.clone();
            tasks.spawn(async move { pool.reaper_loop(shutdown).await });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Worker task terminated abnormally");
            }
        }
        tracing::info!("Worker pool stopped");
    }

    async fn worker_loop(&self, worker_id: usize, shutdown: CancellationToken) {
        tracing::debug!(worker_id, "Worker loop started");

        loop {
            let delivery = match self.queue.dequeue(&shutdown).await {
                Ok(Some(delivery)) => delivery,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(worker_id, error = %e, "Dequeue failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(DEQUEUE_ERROR_BACKOFF) => continue,
                    }
                }
            };
            self.handle(worker_id, delivery).await;
        }

        tracing::debug!(worker_id, "Worker loop stopped");
    }

    /// Process one delivery and settle it with the queue.
    ///
    /// The job is acked only after the execution is terminal; any error
    /// before that is a nack, and an exhausted budget fails the execution.
    async fn handle(&self, worker_id: usize, delivery: Delivery) {
        let Delivery { handle, job } = delivery;
        tracing::info!(
            worker_id,
            job_id = handle.job_id,
            execution_id = %handle.execution_id,
            attempt = handle.attempt,
            "Processing job",
        );

        match self.processor.process(&job).await {
            Ok(outcome) => {
                if let BatchOutcome::Finalized { status, summary } = outcome {
                    tracing::info!(
                        worker_id,
                        execution_id = %handle.execution_id,
                        status = %status,
                        successful = summary.successful,
                        failed = summary.failed,
                        "Job finished",
                    );
                }
                if let Err(e) = self.queue.ack(&handle).await {
                    tracing::warn!(
                        worker_id,
                        job_id = handle.job_id,
                        error = %e,
                        "Failed to acknowledge finished job",
                    );
                }
            }
            Err(e) => {
                tracing::error!(
                    worker_id,
                    execution_id = %handle.execution_id,
                    attempt = handle.attempt,
                    error = %e,
                    "Job processing failed",
                );
                match self.queue.nack(&handle, &e.to_string()).await {
                    Ok(NackOutcome::Retrying { delay }) => {
                        tracing::warn!(
                            execution_id = %handle.execution_id,
                            delay_ms = delay.as_millis() as u64,
                            "Job scheduled for redelivery",
                        );
                    }
                    Ok(NackOutcome::Exhausted) => {
                        tracing::error!(
                            execution_id = %handle.execution_id,
                            attempts = handle.attempt,
                            "Job exhausted its attempts",
                        );
                        if let Err(e) = self
                            .processor
                            .fail_execution(handle.execution_id, Some(&job))
                            .await
                        {
                            tracing::error!(
                                execution_id = %handle.execution_id,
                                error = %e,
                                "Failed to mark exhausted execution as failed",
                            );
                        }
                    }
                    Err(e) => {
                        tracing::error!(
                            job_id = handle.job_id,
                            error = %e,
                            "Failed to release job",
                        );
                    }
                }
            }
        }
    }

    async fn reaper_loop(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.reaper_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.reap().await,
            }
        }
    }

    /// Fail executions whose jobs were abandoned with no attempts left.
    pub async fn reap(&self) {
        let reaped = match self.queue.reap_abandoned().await {
            Ok(reaped) => reaped,
            Err(e) => {
                tracing::error!(error = %e, "Abandoned-job reaper failed");
                return;
            }
        };

        for execution_id in reaped {
            tracing::warn!(execution_id = %execution_id, "Reaped abandoned job");
            if let Err(e) = self.processor.fail_execution(execution_id, None).await {
                tracing::error!(
                    execution_id = %execution_id,
                    error = %e,
                    "Failed to mark abandoned execution as failed",
                );
            }
        }
    }
}
