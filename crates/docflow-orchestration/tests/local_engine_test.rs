//! End-to-end behavior of the local engine: lifecycle, back-pressure,
//! long-poll, deadlines, and bulk cleanup.

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::Semaphore;

use common::{http_source, MockPipeline};
use docflow_orchestration::engines::local::{LocalOrchestrator, LocalOrchestratorConfig};
use docflow_orchestration::orchestrator::{Orchestrator, TaskRequest};
use docflow_shared::error::DocflowError;
use docflow_shared::types::{TaskId, TaskResult, TaskStatus, TaskTarget, TaskType};

fn convert_request(urls: &[&str]) -> TaskRequest {
    TaskRequest::new(
        TaskType::Convert,
        urls.iter().map(|url| http_source(url)).collect(),
        serde_json::json!({"to_formats": ["md"]}),
        TaskTarget::InBody,
    )
}

fn engine_with(pipeline: MockPipeline, config: LocalOrchestratorConfig) -> LocalOrchestrator {
    LocalOrchestrator::new(config, Arc::new(pipeline))
}

#[tokio::test]
async fn test_happy_path_convert_in_body() {
    let engine = engine_with(MockPipeline::new(), LocalOrchestratorConfig::default());
    engine.process_queue().await.unwrap();

    let task = engine
        .enqueue(convert_request(&["https://example.com/a.pdf"]))
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
    assert_eq!(done.processing_meta.num_failed, 0);
    assert!(done.finished_at.is_some());

    let result = engine.task_result(task.task_id).await.unwrap().unwrap();
    match result.as_ref() {
        TaskResult::Convert(conversion) => {
            assert_eq!(conversion.documents.len(), 1);
            assert_eq!(conversion.documents[0].filename, "a.pdf");
            assert!(!conversion.documents[0]
                .markdown
                .as_deref()
                .unwrap()
                .is_empty());
        }
        other => panic!("expected convert result, got {other:?}"),
    }
}

#[tokio::test]
async fn test_enqueue_empty_sources_creates_no_task() {
    let engine = engine_with(MockPipeline::new(), LocalOrchestratorConfig::default());
    let err = engine
        .enqueue(TaskRequest::new(
            TaskType::Convert,
            vec![],
            serde_json::Value::Null,
            TaskTarget::InBody,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, DocflowError::InvalidRequest(_)));
    assert_eq!(engine.queue_size().await.unwrap(), 0);
}

#[tokio::test]
async fn test_unknown_task_id() {
    let engine = engine_with(MockPipeline::new(), LocalOrchestratorConfig::default());
    let ghost = TaskId::new();

    let err = engine.task_status(ghost, Duration::ZERO).await.unwrap_err();
    assert!(matches!(err, DocflowError::TaskNotFound(_)));

    // task_result is nil, not an error, on unknown ids.
    assert!(engine.task_result(ghost).await.unwrap().is_none());
    assert_eq!(engine.queue_position(ghost).await.unwrap(), None);
}

#[tokio::test]
async fn test_queue_full_back_pressure() {
    // Workers are never started: the queue stays saturated.
    let engine = engine_with(
        MockPipeline::new(),
        LocalOrchestratorConfig {
            queue_max_size: 2,
            ..Default::default()
        },
    );

    let first = engine
        .enqueue(convert_request(&["https://example.com/1.pdf"]))
        .await
        .unwrap();
    let second = engine
        .enqueue(convert_request(&["https://example.com/2.pdf"]))
        .await
        .unwrap();
    assert_eq!(first.task_status, TaskStatus::Pending);
    assert_eq!(second.task_status, TaskStatus::Pending);

    let err = engine
        .enqueue(convert_request(&["https://example.com/3.pdf"]))
        .await
        .unwrap_err();
    assert!(matches!(err, DocflowError::QueueFull(_)));

    // Positions are 1-based and reflect admission order.
    assert_eq!(engine.queue_position(first.task_id).await.unwrap(), Some(1));
    assert_eq!(
        engine.queue_position(second.task_id).await.unwrap(),
        Some(2)
    );
}

#[tokio::test]
async fn test_long_poll_returns_on_completion_not_deadline() {
    let engine = engine_with(
        MockPipeline::new().with_delay(Duration::from_millis(500)),
        LocalOrchestratorConfig::default(),
    );
    engine.process_queue().await.unwrap();

    let task = engine
        .enqueue(convert_request(&["https://example.com/a.pdf"]))
        .await
        .unwrap();

    let started = std::time::Instant::now();
    let done = engine
        .task_status(task.task_id, Duration::from_secs(30))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(done.task_status, TaskStatus::Success);
    assert!(
        elapsed < Duration::from_secs(5),
        "long-poll should return shortly after completion, took {elapsed:?}"
    );
}

#[tokio::test]
async fn test_bulk_clear_removes_tasks_and_scratch_dirs() {
    let scratch_root = tempfile::tempdir().unwrap();
    let engine = engine_with(
        MockPipeline::new(),
        LocalOrchestratorConfig {
            scratch_root: scratch_root.path().to_path_buf(),
            ..Default::default()
        },
    );
    engine.process_queue().await.unwrap();

    let mut task_ids = Vec::new();
    for n in 0..3 {
        let task = engine
            .enqueue(TaskRequest::new(
                TaskType::Convert,
                vec![http_source(&format!("https://example.com/{n}.pdf"))],
                serde_json::Value::Null,
                TaskTarget::Zip,
            ))
            .await
            .unwrap();
        task_ids.push(task.task_id);
    }
    for task_id in &task_ids {
        let done = engine
            .task_status(*task_id, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(done.task_status, TaskStatus::Success);
        assert!(scratch_root.path().join(task_id.to_string()).exists());
    }

    let removed = engine.clear_results(Duration::ZERO).await.unwrap();
    assert_eq!(removed, 3);

    for task_id in &task_ids {
        let err = engine.task_status(*task_id, Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, DocflowError::TaskNotFound(_)));
        assert!(!scratch_root.path().join(task_id.to_string()).exists());
    }
}

#[tokio::test]
async fn test_single_worker_starts_tasks_in_enqueue_order() {
    let pipeline = Arc::new(MockPipeline::new().with_delay(Duration::from_millis(20)));
    let engine = LocalOrchestrator::new(
        LocalOrchestratorConfig {
            num_workers: 1,
            ..Default::default()
        },
        pipeline.clone(),
    );

    let mut expected = Vec::new();
    for n in 0..4 {
        let task = engine
            .enqueue(convert_request(&[&format!("https://example.com/{n}.pdf")]))
            .await
            .unwrap();
        expected.push(task.task_id);
    }
    engine.process_queue().await.unwrap();

    for task_id in &expected {
        let done = engine
            .task_status(*task_id, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(done.task_status, TaskStatus::Success);
    }

    assert_eq!(pipeline.processed_order(), expected);
}

#[tokio::test]
async fn test_deadline_exceeded_fails_task() {
    let gate = Arc::new(Semaphore::new(0));
    let engine = engine_with(
        MockPipeline::new().gated(gate.clone()),
        LocalOrchestratorConfig::default(),
    );
    engine.process_queue().await.unwrap();

    let task = engine
        .enqueue(TaskRequest::new(
            TaskType::Convert,
            vec![http_source("https://example.com/slow.pdf")],
            serde_json::json!({"document_timeout": 0.2}),
            TaskTarget::InBody,
        ))
        .await
        .unwrap();

    let done = engine
        .task_status(task.task_id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(done.task_status, TaskStatus::Failure);
    let message = done.error_message.unwrap();
    assert!(message.contains("timed out"), "got: {message}");
    assert!(engine.task_result(task.task_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_pipeline_failure_preserves_message() {
    let engine = engine_with(
        MockPipeline::new().failing("OCR backend exploded"),
        LocalOrchestratorConfig::default(),
    );
    engine.process_queue().await.unwrap();

    let task = engine
        .enqueue(convert_request(&["https://example.com/bad.pdf"]))
        .await
        .unwrap();
    let done = engine
        .task_status(task.task_id, Duration::from_secs(10))
        .await
        .unwrap();

    assert_eq!(done.task_status, TaskStatus::Failure);
    assert_eq!(done.error_message.as_deref(), Some("OCR backend exploded"));
    assert!(engine.task_result(task.task_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_subscribe_progress_ends_with_terminal_snapshot() {
    let engine = engine_with(
        MockPipeline::new().with_delay(Duration::from_millis(50)),
        LocalOrchestratorConfig::default(),
    );

    let task = engine
        .enqueue(convert_request(&["https://example.com/a.pdf"]))
        .await
        .unwrap();
    let stream = engine.subscribe_progress(task.task_id).await.unwrap();
    engine.process_queue().await.unwrap();

    let snapshots: Vec<_> = stream.collect().await;
    assert!(!snapshots.is_empty());
    let last = snapshots.last().unwrap();
    assert!(last.task_status.is_terminal());

    // Statuses arrive in causal order: pending never follows started,
    // nothing follows a terminal snapshot.
    let mut rank_seen = 0;
    for snapshot in &snapshots {
        let rank = match snapshot.task_status {
            TaskStatus::Pending => 0,
            TaskStatus::Started => 1,
            TaskStatus::Success | TaskStatus::Failure => 2,
        };
        assert!(rank >= rank_seen, "status went backwards: {snapshots:?}");
        rank_seen = rank;
    }

    // Restartable: a fresh subscription on a terminal task yields exactly
    // the terminal snapshot.
    let replay: Vec<_> = engine
        .subscribe_progress(task.task_id)
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(replay.len(), 1);
    assert!(replay[0].task_status.is_terminal());
}

#[tokio::test]
async fn test_chunk_task_roundtrip() {
    let engine = engine_with(MockPipeline::new(), LocalOrchestratorConfig::default());
    engine.process_queue().await.unwrap();

    let task = engine
        .enqueue(TaskRequest::new(
            TaskType::Chunk,
            vec![http_source("https://example.com/a.pdf")],
            serde_json::json!({"max_tokens": 512}),
            TaskTarget::InBody,
        ))
        .await
        .unwrap();
    let done = engine
        .task_status(task.task_id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(done.task_status, TaskStatus::Success);

    let result = engine.task_result(task.task_id).await.unwrap().unwrap();
    match result.as_ref() {
        TaskResult::Chunk(chunks) => {
            assert_eq!(chunks.chunks.len(), 1);
            assert!(chunks.chunks[0].text.contains("a.pdf"));
        }
        other => panic!("expected chunk result, got {other:?}"),
    }
}

#[tokio::test]
async fn test_delete_task_is_idempotent_and_cancels() {
    let gate = Arc::new(Semaphore::new(0));
    let engine = engine_with(
        MockPipeline::new().gated(gate.clone()),
        LocalOrchestratorConfig::default(),
    );
    engine.process_queue().await.unwrap();

    let task = engine
        .enqueue(convert_request(&["https://example.com/a.pdf"]))
        .await
        .unwrap();
    // Give the worker a moment to pick it up and block on the gate.
    tokio::time::sleep(Duration::from_millis(50)).await;

    engine.delete_task(task.task_id).await.unwrap();
    engine.delete_task(task.task_id).await.unwrap();

    let err = engine
        .task_status(task.task_id, Duration::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(err, DocflowError::TaskNotFound(_)));
}

#[tokio::test]
async fn test_clear_converters_reaches_pipeline() {
    let pipeline = Arc::new(MockPipeline::new());
    let engine = LocalOrchestrator::new(LocalOrchestratorConfig::default(), pipeline.clone());
    engine.clear_converters().await.unwrap();
    assert_eq!(
        pipeline.cache_clears.load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn test_single_use_results_local_opt_in() {
    let engine = engine_with(
        MockPipeline::new(),
        LocalOrchestratorConfig {
            single_use_results: true,
            result_removal_delay: Duration::from_millis(100),
            ..Default::default()
        },
    );
    engine.process_queue().await.unwrap();

    let task = engine
        .enqueue(convert_request(&["https://example.com/a.pdf"]))
        .await
        .unwrap();
    engine
        .task_status(task.task_id, Duration::from_secs(10))
        .await
        .unwrap();

    assert!(engine.task_result(task.task_id).await.unwrap().is_some());
    tokio::time::sleep(Duration::from_millis(400)).await;

    let err = engine
        .task_status(task.task_id, Duration::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(err, DocflowError::TaskNotFound(_)));
    assert!(engine.task_result(task.task_id).await.unwrap().is_none());
}
