//! # Local Engine
//!
//! In-process worker pool. Tasks flow through an unbounded FIFO channel of
//! task ids; admission is gated on the pending count when `queue_max_size`
//! is nonzero. Workers invoke the pipeline directly and enforce per-task
//! deadlines cooperatively.

mod worker;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use docflow_shared::config::DocflowConfig;
use docflow_shared::error::{DocflowError, DocflowResult};
use docflow_shared::types::{ProgressUpdate, Task, TaskId, TaskResult, TaskStatus};

use crate::orchestrator::{Orchestrator, ProgressStream, TaskRequest};
use crate::pipeline::DocumentPipeline;
use crate::tracker::TaskTracker;

/// Configuration for the local engine.
#[derive(Debug, Clone)]
pub struct LocalOrchestratorConfig {
    /// Worker pool size.
    pub num_workers: usize,
    /// Maximum pending tasks; 0 means unbounded.
    pub queue_max_size: usize,
    /// Deadline applied when a submission's options carry none.
    pub default_document_timeout: Duration,
    /// Root for per-task scratch directories.
    pub scratch_root: PathBuf,
    /// Whether fetching a result schedules its deletion.
    pub single_use_results: bool,
    /// Delay before single-use deletion.
    pub result_removal_delay: Duration,
}

impl Default for LocalOrchestratorConfig {
    fn default() -> Self {
        Self {
            num_workers: 2,
            queue_max_size: 0,
            default_document_timeout: Duration::from_secs(3_600 * 4),
            scratch_root: std::env::temp_dir().join("docflow-scratch"),
            single_use_results: false,
            result_removal_delay: Duration::from_secs(10),
        }
    }
}

impl From<&DocflowConfig> for LocalOrchestratorConfig {
    fn from(config: &DocflowConfig) -> Self {
        Self {
            num_workers: config.num_workers.max(1),
            queue_max_size: config.queue_max_size,
            default_document_timeout: config.default_document_timeout(),
            scratch_root: config
                .scratch_root
                .clone()
                .unwrap_or_else(|| std::env::temp_dir().join("docflow-scratch")),
            single_use_results: config.single_use_results(),
            result_removal_delay: config.result_removal_delay(),
        }
    }
}

pub(crate) struct LocalInner {
    pub(crate) config: LocalOrchestratorConfig,
    pub(crate) tracker: TaskTracker,
    pub(crate) pipeline: Arc<dyn DocumentPipeline>,
    queue_tx: mpsc::UnboundedSender<TaskId>,
    queue_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<TaskId>>>,
    workers_started: AtomicBool,
}

/// In-process engine backend.
#[derive(Clone)]
pub struct LocalOrchestrator {
    inner: Arc<LocalInner>,
}

impl LocalOrchestrator {
    pub fn new(config: LocalOrchestratorConfig, pipeline: Arc<dyn DocumentPipeline>) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(LocalInner {
                config,
                tracker: TaskTracker::new(),
                pipeline,
                queue_tx,
                queue_rx: std::sync::Mutex::new(Some(queue_rx)),
                workers_started: AtomicBool::new(false),
            }),
        }
    }
}

#[async_trait]
impl Orchestrator for LocalOrchestrator {
    async fn enqueue(&self, request: TaskRequest) -> DocflowResult<Task> {
        request.validate()?;
        let task = Task::new(
            TaskId::new(),
            request.task_type,
            request.sources,
            request.options,
            request.target,
        );
        let task_id = task.task_id;
        self.inner
            .tracker
            .admit(task.clone(), self.inner.config.queue_max_size)?;
        self.inner
            .queue_tx
            .send(task_id)
            .map_err(|_| DocflowError::internal("worker queue closed"))?;
        debug!(task_id = %task_id, task_type = %task.task_type, "Task enqueued");
        Ok(task)
    }

    async fn task_status(&self, task_id: TaskId, wait: Duration) -> DocflowResult<Task> {
        self.inner
            .tracker
            .wait_for_status_change(task_id, wait)
            .await
            .ok_or_else(|| DocflowError::task_not_found(task_id))
    }

    async fn queue_size(&self) -> DocflowResult<usize> {
        Ok(self.inner.tracker.pending_count())
    }

    async fn queue_position(&self, task_id: TaskId) -> DocflowResult<Option<usize>> {
        Ok(self.inner.tracker.pending_position(task_id))
    }

    async fn task_result(&self, task_id: TaskId) -> DocflowResult<Option<Arc<TaskResult>>> {
        let Some(task) = self.inner.tracker.get(task_id) else {
            return Ok(None);
        };
        if task.task_status != TaskStatus::Success {
            return Ok(None);
        }
        let result = self.inner.tracker.result(task_id);
        if result.is_some()
            && self.inner.config.single_use_results
            && self.inner.tracker.try_begin_removal(task_id)
        {
            let inner = self.inner.clone();
            let delay = self.inner.config.result_removal_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                debug!(task_id = %task_id, "Single-use removal firing");
                inner.tracker.remove(task_id);
            });
        }
        Ok(result)
    }

    async fn delete_task(&self, task_id: TaskId) -> DocflowResult<()> {
        self.inner.tracker.remove(task_id);
        Ok(())
    }

    async fn clear_results(&self, older_than: Duration) -> DocflowResult<usize> {
        let removed = self.inner.tracker.clear_terminal_older_than(older_than);
        if !removed.is_empty() {
            info!(count = removed.len(), "Cleared terminal tasks");
        }
        Ok(removed.len())
    }

    async fn clear_converters(&self) -> DocflowResult<()> {
        self.inner.pipeline.clear_caches().await;
        Ok(())
    }

    async fn process_queue(&self) -> DocflowResult<()> {
        if self
            .inner
            .workers_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        let queue_rx = self
            .inner
            .queue_rx
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
            .ok_or_else(|| DocflowError::internal("worker queue receiver already taken"))?;
        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));

        for index in 0..self.inner.config.num_workers.max(1) {
            let inner = self.inner.clone();
            let queue_rx = queue_rx.clone();
            tokio::spawn(worker::worker_loop(index, inner, queue_rx));
        }
        info!(
            num_workers = self.inner.config.num_workers.max(1),
            "Local engine workers started"
        );
        Ok(())
    }

    async fn check_connection(&self) -> DocflowResult<()> {
        Ok(())
    }

    async fn subscribe_progress(&self, task_id: TaskId) -> DocflowResult<ProgressStream> {
        self.inner
            .tracker
            .subscribe(task_id)
            .map(ReceiverStream::new)
            .ok_or_else(|| DocflowError::task_not_found(task_id))
    }

    async fn apply_progress(&self, task_id: TaskId, update: ProgressUpdate) -> DocflowResult<()> {
        self.inner
            .tracker
            .apply_progress(task_id, update)
            .map(|_| ())
            .ok_or_else(|| DocflowError::task_not_found(task_id))
    }
}
