//! Worker loop for the local engine: receive a task id, run the pipeline
//! under the task's deadline, publish the terminal snapshot.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use docflow_shared::types::{
    ProgressUpdate, Task, TaskId, TaskResult, TaskStatus, TaskType,
};

use crate::pipeline::{PipelineRequest, ProgressHook};

use super::LocalInner;

pub(super) async fn worker_loop(
    index: usize,
    inner: Arc<LocalInner>,
    queue_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<TaskId>>>,
) {
    debug!(worker = index, "Worker started");
    loop {
        // Hold the receiver lock only for the handoff so siblings can take
        // the next item while this worker processes.
        let task_id = { queue_rx.lock().await.recv().await };
        let Some(task_id) = task_id else {
            debug!(worker = index, "Queue closed, worker exiting");
            break;
        };
        run_task(&inner, index, task_id).await;
    }
}

async fn run_task(inner: &Arc<LocalInner>, worker: usize, task_id: TaskId) {
    let Some(task) = inner.tracker.get(task_id) else {
        // Deleted between admission and pickup.
        debug!(worker, task_id = %task_id, "Task vanished before pickup, skipping");
        return;
    };
    if task.is_terminal() {
        return;
    }

    if task.target.needs_scratch_dir() {
        let dir = inner.config.scratch_root.join(task_id.to_string());
        if let Err(err) = std::fs::create_dir_all(&dir) {
            warn!(task_id = %task_id, error = %err, "Failed to create scratch dir");
        } else {
            inner.tracker.set_scratch_dir(task_id, dir);
        }
    }

    inner.tracker.update_status(task_id, TaskStatus::Started, None);

    let token = CancellationToken::new();
    inner.tracker.register_running(task_id, token.clone());

    let progress: ProgressHook = {
        let inner = inner.clone();
        Arc::new(move |update| {
            inner.tracker.apply_progress(task_id, update);
        })
    };

    let deadline = task
        .document_timeout()
        .unwrap_or(inner.config.default_document_timeout);
    let scratch_dir = inner.tracker.get(task_id).and_then(|t| t.scratch_dir);
    let request = PipelineRequest {
        task_id,
        sources: task.sources.clone(),
        options: task.options.clone(),
        scratch_dir,
        progress,
        cancel: token.clone(),
    };

    let invocation = async {
        match task.task_type {
            TaskType::Convert => inner.pipeline.convert(request).await.map(TaskResult::Convert),
            TaskType::Chunk => inner.pipeline.chunk(request).await.map(TaskResult::Chunk),
        }
    };

    let outcome = tokio::time::timeout(deadline, invocation).await;
    inner.tracker.clear_running(task_id);

    match outcome {
        Ok(Ok(result)) => {
            finalize_meta(inner, task_id, &result);
            inner.tracker.store_result(task_id, Arc::new(result));
            inner.tracker.update_status(task_id, TaskStatus::Success, None);
            debug!(worker, task_id = %task_id, "Task succeeded");
        }
        Ok(Err(err)) => {
            inner
                .tracker
                .update_status(task_id, TaskStatus::Failure, Some(err.to_string()));
            warn!(worker, task_id = %task_id, error = %err, "Task failed");
        }
        Err(_) => {
            token.cancel();
            let message = format!(
                "Processing timed out after {:.1} seconds",
                deadline.as_secs_f64()
            );
            inner
                .tracker
                .update_status(task_id, TaskStatus::Failure, Some(message));
            warn!(worker, task_id = %task_id, timeout_secs = deadline.as_secs_f64(), "Task timed out");
        }
    }
}

/// Ensure the terminal snapshot carries sensible counters even when a
/// pipeline never reported progress.
fn finalize_meta(inner: &Arc<LocalInner>, task_id: TaskId, result: &TaskResult) {
    let reported = inner
        .tracker
        .get(task_id)
        .map(|t: Task| t.processing_meta.num_processed > 0)
        .unwrap_or(false);
    if reported {
        return;
    }
    let count = result.document_count();
    inner
        .tracker
        .apply_progress(task_id, ProgressUpdate::SetNumDocs { num_docs: count });
    inner.tracker.apply_progress(
        task_id,
        ProgressUpdate::UpdateProcessed {
            num_processed: count,
            num_succeeded: count,
            num_failed: 0,
        },
    );
}
