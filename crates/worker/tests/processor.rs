mod common;

use assert_matches::assert_matches;
use common::*;
use genbatch_core::failure::{ErrorKind, CAUSE_CANCELLED, CAUSE_INTERRUPTED};
use genbatch_core::progress::BatchSummary;
use genbatch_db::models::status::{BatchResultStatus, ExecutionStatus};
use genbatch_worker::store::ExecutionStore;
use genbatch_worker::{BatchOutcome, WorkerError};

use BatchResultStatus::{Completed, Failed, Pending, Processing};

#[tokio::test]
async fn all_prompts_succeed() {
    let h = Harness::new();
    let job = job(&["a red fox", "a blue whale", "a green frog"]);

    let outcome = h.processor.process(&job).await.unwrap();

    assert_eq!(
        outcome,
        BatchOutcome::Finalized {
            status: ExecutionStatus::Completed,
            summary: BatchSummary {
                successful: 3,
                failed: 0,
                total: 3
            },
        }
    );
    assert_eq!(h.store.statuses(job.execution_id), vec![Completed; 3]);
    assert_eq!(h.generator.prompts(), job.input_data.prompts);
    assert_eq!(h.generator.api_keys(), vec![API_KEY; 3]);

    let execution = h.store.execution(job.execution_id).unwrap();
    assert_eq!(execution.status(), Some(ExecutionStatus::Completed));
    assert_eq!(execution.progress, 100);
    assert_eq!(execution.error, None);
    assert_eq!(execution.successful_count, Some(3));
    assert_eq!(h.store.progress_updates(), vec![30, 60, 90]);

    for result in h.store.results(job.execution_id) {
        assert!(result.result_url.unwrap().starts_with("https://cdn.test/generated/"));
        assert_eq!(result.mime_type.as_deref(), Some("image/png"));
        assert!(result.processing_time_ms.is_some());
        assert!(result.error_message.is_none());
    }
}

#[tokio::test]
async fn one_failed_prompt_does_not_stop_the_batch() {
    let generator = FakeGenerator::default().fail_prompt(
        "a blue whale",
        http_error(500, "upstream exploded"),
    );
    let h = Harness::with(generator, FakeStorage::default(), FakeCredentials::valid());
    let job = job(&["a red fox", "a blue whale", "a green frog"]);

    let outcome = h.processor.process(&job).await.unwrap();

    assert_matches!(
        outcome,
        BatchOutcome::Finalized {
            status: ExecutionStatus::Completed,
            summary: BatchSummary { successful: 2, failed: 1, total: 3 },
        }
    );
    assert_eq!(h.store.statuses(job.execution_id), vec![Completed, Failed, Completed]);
    assert_eq!(h.generator.calls(), 3);

    let failed = &h.store.results(job.execution_id)[1];
    assert_eq!(failed.error_kind.as_deref(), Some("server"));
    assert!(failed.error_message.as_deref().unwrap().contains("HTTP 500"));
    assert!(failed.result_url.is_none());

    let execution = h.store.execution(job.execution_id).unwrap();
    assert_eq!(execution.error, None);
    assert_eq!(execution.failed_count, Some(1));
}

#[tokio::test]
async fn auth_failure_aborts_remaining_prompts() {
    let generator =
        FakeGenerator::default().fail_prompt("a red fox", http_error(401, "API key not valid"));
    let h = Harness::with(generator, FakeStorage::default(), FakeCredentials::valid());
    let job = job(&["a red fox", "a blue whale", "a green frog"]);

    let outcome = h.processor.process(&job).await.unwrap();

    assert_matches!(
        outcome,
        BatchOutcome::Finalized {
            status: ExecutionStatus::Failed,
            summary: BatchSummary { successful: 0, failed: 3, total: 3 },
        }
    );
    assert_eq!(h.generator.calls(), 1);

    let results = h.store.results(job.execution_id);
    let cause = results[0].error_message.clone().unwrap();
    assert!(cause.contains("API key not valid"));
    for result in &results {
        assert_eq!(result.status(), Some(Failed));
        assert_eq!(result.error_message.as_deref(), Some(cause.as_str()));
        assert_eq!(result.error_kind.as_deref(), Some("auth"));
    }

    let execution = h.store.execution(job.execution_id).unwrap();
    assert_eq!(execution.error.as_deref(), Some(cause.as_str()));
    assert_eq!(execution.progress, 100);
}

#[tokio::test]
async fn every_prompt_failing_fails_the_execution() {
    let generator = FakeGenerator::default()
        .fail_prompt("first", error(ErrorKind::EmptyResult, "no inline image data"))
        .fail_prompt("second", error(ErrorKind::Timeout, "Request timed out after 120000ms"));
    let h = Harness::with(generator, FakeStorage::default(), FakeCredentials::valid());
    let job = job(&["first", "second"]);

    h.processor.process(&job).await.unwrap();

    let execution = h.store.execution(job.execution_id).unwrap();
    assert_eq!(execution.status(), Some(ExecutionStatus::Failed));
    assert_eq!(execution.error.as_deref(), Some("All 2 items failed"));
    assert_eq!(execution.summary(), Some(BatchSummary { successful: 0, failed: 2, total: 2 }));
}

#[tokio::test]
async fn redelivery_resumes_with_pending_items_only() {
    let h = Harness::new();
    let job = job(&["a red fox", "a blue whale", "a green frog"]);
    h.store.create_execution(&create_input(&job)).await.unwrap();
    h.store.set_item_status(job.execution_id, 0, Completed);

    h.processor.process(&job).await.unwrap();

    assert_eq!(h.generator.prompts(), vec!["a blue whale", "a green frog"]);
    assert_eq!(h.store.statuses(job.execution_id), vec![Completed; 3]);
    assert_eq!(h.store.progress_updates(), vec![60, 90]);

    let first = &h.store.results(job.execution_id)[0];
    assert_eq!(first.result_url.as_deref(), Some("https://cdn.test/earlier/0.png"));
}

#[tokio::test]
async fn queued_execution_is_started_before_items_run() {
    let h = Harness::new();
    let job = job(&["a red fox", "a blue whale", "a green frog"]);
    h.store.create_execution(&create_input(&job)).await.unwrap();
    h.store.set_execution_status(job.execution_id, ExecutionStatus::Queued);

    h.processor.process(&job).await.unwrap();

    assert_eq!(h.store.progress_updates(), vec![30, 60, 90]);
    let execution = h.store.execution(job.execution_id).unwrap();
    assert_eq!(execution.status(), Some(ExecutionStatus::Completed));
    assert_eq!(execution.progress, 100);
}

#[tokio::test]
async fn item_finished_by_another_delivery_keeps_its_result() {
    let h = Harness::new();
    let job = job(&["a red fox", "a blue whale", "a green frog"]);
    h.store.create_execution(&create_input(&job)).await.unwrap();
    h.store.finish_elsewhere(1);

    let outcome = h.processor.process(&job).await.unwrap();

    assert_matches!(
        outcome,
        BatchOutcome::Finalized {
            status: ExecutionStatus::Completed,
            summary: BatchSummary { successful: 3, failed: 0, total: 3 },
        }
    );
    let kept = &h.store.results(job.execution_id)[1];
    assert_eq!(kept.result_url.as_deref(), Some("https://cdn.test/elsewhere/1.png"));
    assert_eq!(kept.processing_time_ms, None);
    // The discarded item does not advance progress.
    assert_eq!(h.store.progress_updates(), vec![30, 60]);
}

#[tokio::test]
async fn item_left_processing_is_failed_as_interrupted() {
    let h = Harness::new();
    let job = job(&["a red fox", "a blue whale", "a green frog"]);
    h.store.create_execution(&create_input(&job)).await.unwrap();
    h.store.set_item_status(job.execution_id, 0, Completed);
    h.store.set_item_status(job.execution_id, 1, Processing);

    let outcome = h.processor.process(&job).await.unwrap();

    assert_matches!(
        outcome,
        BatchOutcome::Finalized {
            status: ExecutionStatus::Completed,
            summary: BatchSummary { successful: 2, failed: 1, total: 3 },
        }
    );
    assert_eq!(h.generator.prompts(), vec!["a green frog"]);
    let interrupted = &h.store.results(job.execution_id)[1];
    assert_eq!(interrupted.status(), Some(Failed));
    assert_eq!(interrupted.error_message.as_deref(), Some(CAUSE_INTERRUPTED));
}

#[tokio::test]
async fn finalized_execution_is_left_alone() {
    let h = Harness::new();
    let job = job(&["a red fox"]);
    h.store.create_execution(&create_input(&job)).await.unwrap();
    h.store.set_execution_status(job.execution_id, ExecutionStatus::Completed);

    let outcome = h.processor.process(&job).await.unwrap();

    assert_eq!(outcome, BatchOutcome::AlreadyFinalized);
    assert_eq!(h.generator.calls(), 0);
    assert_eq!(h.store.statuses(job.execution_id), vec![Pending]);
}

#[tokio::test]
async fn cancellation_stops_between_prompts() {
    let h = Harness::new();
    let job = job(&["a red fox", "a blue whale", "a green frog"]);
    h.store.cancel_after_items(1);

    let outcome = h.processor.process(&job).await.unwrap();

    assert_matches!(
        outcome,
        BatchOutcome::Finalized {
            status: ExecutionStatus::Completed,
            summary: BatchSummary { successful: 1, failed: 2, total: 3 },
        }
    );
    assert_eq!(h.generator.calls(), 1);
    assert_eq!(h.store.statuses(job.execution_id), vec![Completed, Failed, Failed]);
    let cancelled = &h.store.results(job.execution_id)[2];
    assert_eq!(cancelled.error_message.as_deref(), Some(CAUSE_CANCELLED));
}

#[tokio::test]
async fn cancellation_before_start_fails_everything() {
    let h = Harness::new();
    let job = job(&["a red fox", "a blue whale"]);
    h.store.create_execution(&create_input(&job)).await.unwrap();
    h.store.request_cancel(job.execution_id);

    h.processor.process(&job).await.unwrap();

    assert_eq!(h.generator.calls(), 0);
    let execution = h.store.execution(job.execution_id).unwrap();
    assert_eq!(execution.status(), Some(ExecutionStatus::Failed));
    assert_eq!(execution.error.as_deref(), Some(CAUSE_CANCELLED));
}

#[tokio::test]
async fn upload_is_retried_until_it_succeeds() {
    let h = Harness::with(FakeGenerator::default(), FakeStorage::failing(2), FakeCredentials::valid());
    let job = job(&["a red fox"]);

    h.processor.process(&job).await.unwrap();

    assert_eq!(h.storage.uploads(), 3);
    assert_eq!(h.generator.calls(), 1);
    assert_eq!(h.store.statuses(job.execution_id), vec![Completed]);
}

#[tokio::test]
async fn exhausted_upload_fails_the_item_without_regenerating() {
    let h = Harness::with(FakeGenerator::default(), FakeStorage::failing(3), FakeCredentials::valid());
    let job = job(&["a red fox", "a blue whale"]);

    let outcome = h.processor.process(&job).await.unwrap();

    assert_matches!(
        outcome,
        BatchOutcome::Finalized {
            status: ExecutionStatus::Completed,
            summary: BatchSummary { successful: 1, failed: 1, total: 2 },
        }
    );
    assert_eq!(h.generator.calls(), 2);
    assert_eq!(h.storage.uploads(), 4);

    let failed = &h.store.results(job.execution_id)[0];
    assert_eq!(failed.error_kind.as_deref(), Some("storage"));
    assert!(failed
        .error_message
        .as_deref()
        .unwrap()
        .starts_with("Storage upload failed"));
}

#[tokio::test]
async fn unresolvable_credential_fails_batch_without_calling_api() {
    let h = Harness::with(FakeGenerator::default(), FakeStorage::default(), FakeCredentials::missing());
    let job = job(&["a red fox", "a blue whale"]);

    let outcome = h.processor.process(&job).await.unwrap();

    assert_matches!(
        outcome,
        BatchOutcome::Finalized { status: ExecutionStatus::Failed, .. }
    );
    assert_eq!(h.generator.calls(), 0);
    for result in h.store.results(job.execution_id) {
        assert_eq!(result.status(), Some(Failed));
        assert_eq!(result.error_kind.as_deref(), Some("auth"));
        assert!(result.error_message.unwrap().contains("not found or revoked"));
    }
}

#[tokio::test]
async fn store_error_leaves_execution_resumable() {
    let h = Harness::new();
    let job = job(&["a red fox", "a blue whale"]);
    h.store.fail_list_results(1);

    assert_matches!(h.processor.process(&job).await, Err(WorkerError::Store(_)));

    let execution = h.store.execution(job.execution_id).unwrap();
    assert_eq!(execution.status(), Some(ExecutionStatus::Processing));
    assert_eq!(h.store.statuses(job.execution_id), vec![Pending, Pending]);

    h.processor.process(&job).await.unwrap();
    assert_eq!(h.store.statuses(job.execution_id), vec![Completed, Completed]);
}

#[tokio::test]
async fn fail_execution_marks_everything_incomplete() {
    let h = Harness::new();
    let job = job(&["a red fox", "a blue whale"]);
    h.store.create_execution(&create_input(&job)).await.unwrap();
    h.store.set_item_status(job.execution_id, 0, Completed);

    assert!(h.processor.fail_execution(job.execution_id, None).await.unwrap());
    assert!(!h.processor.fail_execution(job.execution_id, None).await.unwrap());

    let execution = h.store.execution(job.execution_id).unwrap();
    assert_eq!(execution.status(), Some(ExecutionStatus::Failed));
    assert_eq!(execution.error.as_deref(), Some("processing could not complete"));
    assert_eq!(execution.summary(), Some(BatchSummary { successful: 1, failed: 1, total: 2 }));
}

#[tokio::test]
async fn fail_execution_without_rows_is_a_no_op() {
    let h = Harness::new();
    let job = job(&["a red fox"]);

    assert!(!h.processor.fail_execution(job.execution_id, None).await.unwrap());
    assert!(h.store.execution(job.execution_id).is_none());
}
