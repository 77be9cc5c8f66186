//! # Orchestrator Contract
//!
//! The uniform interface every engine backend implements. All operations
//! are non-blocking to the caller except the long-poll wait in
//! `task_status`. Engines are handed out as `Arc<dyn Orchestrator>` by the
//! factory and shared across the presentation layer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_stream::wrappers::ReceiverStream;

use docflow_shared::error::{DocflowError, DocflowResult};
use docflow_shared::types::{
    ProgressUpdate, Task, TaskId, TaskResult, TaskSource, TaskTarget, TaskType,
};

/// A validated submission, ready to become a task.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub task_type: TaskType,
    pub sources: Vec<TaskSource>,
    /// Opaque pipeline configuration, preserved bit-for-bit.
    pub options: serde_json::Value,
    pub target: TaskTarget,
}

impl TaskRequest {
    pub fn new(
        task_type: TaskType,
        sources: Vec<TaskSource>,
        options: serde_json::Value,
        target: TaskTarget,
    ) -> Self {
        Self {
            task_type,
            sources,
            options,
            target,
        }
    }

    /// Reject structurally invalid submissions before any task record
    /// exists.
    pub fn validate(&self) -> DocflowResult<()> {
        if self.sources.is_empty() {
            return Err(DocflowError::invalid_request(
                "at least one source is required",
            ));
        }
        Ok(())
    }
}

/// Lazy, restartable sequence of task snapshots, terminated by a terminal
/// snapshot. Restartability means a fresh subscription, not replay.
pub type ProgressStream = ReceiverStream<Task>;

/// The engine contract: enqueue, poll, fetch results, cancel, clear.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Construct a fresh task in `pending`, admit it to the backing queue,
    /// and return immediately. Fails with `QueueFull` on a saturated bounded
    /// queue and `InvalidRequest` on empty sources.
    async fn enqueue(&self, request: TaskRequest) -> DocflowResult<Task>;

    /// Current projection of the task. With `wait > 0`, blocks up to that
    /// duration or until the status changes, whichever comes first. Fails
    /// with `TaskNotFound` when no record exists in queue, durable
    /// projection, or cache.
    async fn task_status(&self, task_id: TaskId, wait: Duration) -> DocflowResult<Task>;

    /// Number of tasks waiting in the backing queue.
    async fn queue_size(&self) -> DocflowResult<usize>;

    /// 1-based position among pending tasks; `None` once the task has
    /// started, finished, or is unknown.
    async fn queue_position(&self, task_id: TaskId) -> DocflowResult<Option<usize>>;

    /// The delivered result for a terminal-success task. Returns `None` for
    /// evicted results, non-success tasks, and unknown ids; callers
    /// distinguish via `task_status`.
    async fn task_result(&self, task_id: TaskId) -> DocflowResult<Option<Arc<TaskResult>>>;

    /// Idempotent eviction: in-memory record, durable projection, worker-side
    /// result, and scratch dir.
    async fn delete_task(&self, task_id: TaskId) -> DocflowResult<()>;

    /// Bulk-evict every terminal task whose `finished_at` is older than the
    /// threshold. Returns how many were evicted.
    async fn clear_results(&self, older_than: Duration) -> DocflowResult<usize>;

    /// Ask the pipeline layer to drop warmed caches; orchestrator state is
    /// unaffected.
    async fn clear_converters(&self) -> DocflowResult<()>;

    /// Start the engine's worker loop. Idempotent; called once per process.
    async fn process_queue(&self) -> DocflowResult<()>;

    /// Verify the engine can reach its backing services.
    async fn check_connection(&self) -> DocflowResult<()>;

    /// Subscribe to task snapshots until a terminal one is delivered.
    async fn subscribe_progress(&self, task_id: TaskId) -> DocflowResult<ProgressStream>;

    /// Apply a worker progress report to the task and publish it.
    async fn apply_progress(&self, task_id: TaskId, update: ProgressUpdate) -> DocflowResult<()>;
}
