//! End-to-end behavior of the distributed engine against the in-memory job
//! store: worker consumption, orphan reclassification, single-use results,
//! and cross-instance visibility.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{http_source, MockPipeline};
use docflow_orchestration::engines::rq::{RqOrchestrator, RqOrchestratorConfig};
use docflow_orchestration::orchestrator::{Orchestrator, TaskRequest};
use docflow_shared::error::DocflowError;
use docflow_shared::jobstore::JobStore;
use docflow_shared::types::{TaskResult, TaskStatus, TaskTarget, TaskType};

fn convert_request(url: &str) -> TaskRequest {
    TaskRequest::new(
        TaskType::Convert,
        vec![http_source(url)],
        serde_json::json!({"to_formats": ["md"]}),
        TaskTarget::InBody,
    )
}

fn dev_config() -> RqOrchestratorConfig {
    RqOrchestratorConfig {
        dev_mode: true,
        num_workers: 1,
        single_use_results: false,
        status_poll_interval: Duration::from_millis(25),
        ..Default::default()
    }
}

fn engine(config: RqOrchestratorConfig, pipeline: MockPipeline) -> RqOrchestrator {
    RqOrchestrator::new(config, JobStore::new_in_memory(), Arc::new(pipeline))
}

#[tokio::test]
async fn test_happy_path_through_embedded_worker() {
    let engine = engine(dev_config(), MockPipeline::new());
    engine.process_queue().await.unwrap();

    let task = engine
        .enqueue(convert_request("https://example.com/a.pdf"))
        .await
        .unwrap();
    assert_eq!(task.task_status, TaskStatus::Pending);

    let done = engine
        .task_status(task.task_id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(done.task_status, TaskStatus::Success);
    assert_eq!(done.processing_meta.num_processed, 1);
    assert_eq!(done.processing_meta.num_succeeded, 1);

    let result = engine.task_result(task.task_id).await.unwrap().unwrap();
    match result.as_ref() {
        TaskResult::Convert(conversion) => {
            assert_eq!(conversion.documents[0].filename, "a.pdf");
        }
        other => panic!("expected convert result, got {other:?}"),
    }
}

#[tokio::test]
async fn test_worker_failure_propagates_error_message() {
    let engine = engine(dev_config(), MockPipeline::new().failing("GPU fell off the bus"));
    engine.process_queue().await.unwrap();

    let task = engine
        .enqueue(convert_request("https://example.com/a.pdf"))
        .await
        .unwrap();
    let done = engine
        .task_status(task.task_id, Duration::from_secs(10))
        .await
        .unwrap();

    assert_eq!(done.task_status, TaskStatus::Failure);
    assert_eq!(done.error_message.as_deref(), Some("GPU fell off the bus"));
    assert!(engine.task_result(task.task_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_orphan_reclassification_via_status_api() {
    // No workers: the job sits queued until we vaporize it.
    let config = RqOrchestratorConfig {
        dev_mode: false,
        single_use_results: false,
        ..Default::default()
    };
    let engine = engine(config, MockPipeline::new());

    let task = engine
        .enqueue(convert_request("https://example.com/a.pdf"))
        .await
        .unwrap();

    // Simulate queue-entry TTL expiry / storage eviction.
    engine.store().delete_job(task.task_id).await.unwrap();

    let snapshot = engine
        .task_status(task.task_id, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(snapshot.task_status, TaskStatus::Failure);
    let message = snapshot.error_message.clone().unwrap();
    assert!(message.to_lowercase().contains("orphaned"), "got: {message}");

    // The reclassification is sticky across queries.
    let again = engine
        .task_status(task.task_id, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(again.task_status, TaskStatus::Failure);
    assert!(again
        .error_message
        .unwrap()
        .to_lowercase()
        .contains("orphaned"));
}

#[tokio::test]
async fn test_single_use_result_schedules_full_deletion() {
    let config = RqOrchestratorConfig {
        single_use_results: true,
        result_removal_delay: Duration::from_millis(200),
        ..dev_config()
    };
    let engine = engine(config, MockPipeline::new());
    engine.process_queue().await.unwrap();

    let task = engine
        .enqueue(convert_request("https://example.com/a.pdf"))
        .await
        .unwrap();
    let done = engine
        .task_status(task.task_id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(done.task_status, TaskStatus::Success);

    // First fetch succeeds and arms the deletion timer.
    assert!(engine.task_result(task.task_id).await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(800)).await;

    let err = engine
        .task_status(task.task_id, Duration::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(err, DocflowError::TaskNotFound(_)));
    assert!(engine.task_result(task.task_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_queue_full_at_store_admission() {
    let config = RqOrchestratorConfig {
        queue_max_size: 2,
        dev_mode: false,
        ..Default::default()
    };
    let engine = engine(config, MockPipeline::new());

    engine
        .enqueue(convert_request("https://example.com/1.pdf"))
        .await
        .unwrap();
    engine
        .enqueue(convert_request("https://example.com/2.pdf"))
        .await
        .unwrap();
    let err = engine
        .enqueue(convert_request("https://example.com/3.pdf"))
        .await
        .unwrap_err();
    assert!(matches!(err, DocflowError::QueueFull(_)));
    assert_eq!(engine.queue_size().await.unwrap(), 2);
}

#[tokio::test]
async fn test_queue_positions_are_one_based_and_clear_on_start() {
    let config = RqOrchestratorConfig {
        dev_mode: false,
        ..Default::default()
    };
    let engine = engine(config, MockPipeline::new());

    let first = engine
        .enqueue(convert_request("https://example.com/1.pdf"))
        .await
        .unwrap();
    let second = engine
        .enqueue(convert_request("https://example.com/2.pdf"))
        .await
        .unwrap();

    assert_eq!(engine.queue_position(first.task_id).await.unwrap(), Some(1));
    assert_eq!(
        engine.queue_position(second.task_id).await.unwrap(),
        Some(2)
    );

    // A worker claims the head job: it leaves the queue entirely.
    engine.store().claim_next_job().await.unwrap().unwrap();
    engine.store().mark_job_started(first.task_id).await.unwrap();
    assert_eq!(engine.queue_position(first.task_id).await.unwrap(), None);
    assert_eq!(
        engine.queue_position(second.task_id).await.unwrap(),
        Some(1)
    );
}

#[tokio::test]
async fn test_check_connection_requires_workers_outside_dev_mode() {
    let config = RqOrchestratorConfig {
        dev_mode: false,
        ..Default::default()
    };
    let engine = engine(config, MockPipeline::new());

    let err = engine.check_connection().await.unwrap_err();
    assert!(matches!(err, DocflowError::UpstreamUnavailable(_)));

    engine
        .store()
        .register_worker("external-0", Duration::from_secs(30))
        .await
        .unwrap();
    assert!(engine.check_connection().await.is_ok());
}

#[tokio::test]
async fn test_cross_instance_visibility_through_shared_store() {
    let store = JobStore::new_in_memory();
    let submitter = RqOrchestrator::new(
        RqOrchestratorConfig {
            dev_mode: false,
            ..Default::default()
        },
        store.clone(),
        Arc::new(MockPipeline::new()),
    );
    let observer = RqOrchestrator::new(
        RqOrchestratorConfig {
            dev_mode: false,
            ..Default::default()
        },
        store,
        Arc::new(MockPipeline::new()),
    );

    let task = submitter
        .enqueue(convert_request("https://example.com/a.pdf"))
        .await
        .unwrap();

    // The observer has never seen this task; it reconciles from the store.
    let snapshot = observer
        .task_status(task.task_id, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(snapshot.task_status, TaskStatus::Pending);
    assert_eq!(snapshot.task_type, TaskType::Convert);
}

#[tokio::test]
async fn test_long_poll_sees_worker_completion() {
    let engine = engine(
        dev_config(),
        MockPipeline::new().with_delay(Duration::from_millis(300)),
    );
    engine.process_queue().await.unwrap();

    let task = engine
        .enqueue(convert_request("https://example.com/a.pdf"))
        .await
        .unwrap();

    let started = std::time::Instant::now();
    let done = engine
        .task_status(task.task_id, Duration::from_secs(30))
        .await
        .unwrap();
    assert_eq!(done.task_status, TaskStatus::Success);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_clear_results_evicts_store_state() {
    let engine = engine(dev_config(), MockPipeline::new());
    engine.process_queue().await.unwrap();

    let task = engine
        .enqueue(convert_request("https://example.com/a.pdf"))
        .await
        .unwrap();
    let done = engine
        .task_status(task.task_id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(done.task_status, TaskStatus::Success);

    let removed = engine.clear_results(Duration::ZERO).await.unwrap();
    assert_eq!(removed, 1);

    let err = engine
        .task_status(task.task_id, Duration::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(err, DocflowError::TaskNotFound(_)));
    assert!(engine.task_result(task.task_id).await.unwrap().is_none());
}
