//! # Distributed Engine
//!
//! Client of the durable job store. Workers run as separate processes and
//! consume jobs through the store's worker-side contract; this engine only
//! enqueues, observes, and reconciles.
//!
//! Three sources of truth exist for a task here: the store's job record
//! (authoritative), the TTL-bounded durable projection, and the in-memory
//! cache. The [`reconciler`] merges them on every status query; see that
//! module for the full algorithm.

mod reconciler;
pub mod worker;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use docflow_shared::config::DocflowConfig;
use docflow_shared::error::{DocflowError, DocflowResult};
use docflow_shared::jobstore::{JobState, JobStore, NewJob};
use docflow_shared::resilience::RetryPolicy;
use docflow_shared::types::{
    ProgressUpdate, Task, TaskId, TaskProjection, TaskResult, TaskStatus,
};

use crate::orchestrator::{Orchestrator, ProgressStream, TaskRequest};
use crate::pipeline::DocumentPipeline;
use crate::reaper::{self, ReaperConfig};
use crate::tracker::TaskTracker;

use self::worker::{ProgressBridge, RqWorkerConfig};

/// Configuration for the distributed engine.
#[derive(Debug, Clone)]
pub struct RqOrchestratorConfig {
    /// Prefix for every store key this engine touches.
    pub key_prefix: String,
    /// Retention for results, projections, and finished job records.
    pub results_ttl: Duration,
    /// Retention for failed job records.
    pub failure_ttl: Duration,
    /// Processing deadline stamped on enqueued jobs.
    pub job_timeout: Duration,
    /// Maximum queued jobs; 0 means unbounded.
    pub queue_max_size: usize,
    /// Whether fetching a result schedules its deletion.
    pub single_use_results: bool,
    /// Delay before single-use deletion.
    pub result_removal_delay: Duration,
    /// Re-reconcile cadence while a long-poll waits.
    pub status_poll_interval: Duration,
    /// Run embedded workers inside this process (development mode).
    pub dev_mode: bool,
    /// Embedded worker count (dev mode only).
    pub num_workers: usize,
    /// Zombie reaper settings.
    pub reaper: ReaperConfig,
}

impl Default for RqOrchestratorConfig {
    fn default() -> Self {
        Self {
            key_prefix: "docflow:tasks:".to_string(),
            results_ttl: Duration::from_secs(3_600 * 4),
            failure_ttl: Duration::from_secs(3_600 * 4),
            job_timeout: Duration::from_secs(3_600 * 4),
            queue_max_size: 0,
            single_use_results: true,
            result_removal_delay: Duration::from_secs(10),
            status_poll_interval: Duration::from_secs(1),
            dev_mode: false,
            num_workers: 2,
            reaper: ReaperConfig::default(),
        }
    }
}

impl From<&DocflowConfig> for RqOrchestratorConfig {
    fn from(config: &DocflowConfig) -> Self {
        Self {
            key_prefix: config.key_prefix.clone(),
            results_ttl: config.results_ttl(),
            failure_ttl: config.failure_ttl(),
            job_timeout: config.default_document_timeout(),
            queue_max_size: config.queue_max_size,
            single_use_results: config.single_use_results(),
            result_removal_delay: config.result_removal_delay(),
            status_poll_interval: Duration::from_secs(1),
            dev_mode: config.dev_mode,
            num_workers: config.num_workers.max(1),
            reaper: ReaperConfig {
                sweep_interval: config.sweep_interval(),
                max_age: config.max_age(),
            },
        }
    }
}

pub(crate) struct RqInner {
    config: RqOrchestratorConfig,
    store: JobStore,
    tracker: TaskTracker,
    retry: RetryPolicy,
    pipeline: Arc<dyn DocumentPipeline>,
    result_keys: Mutex<HashMap<TaskId, String>>,
    started: AtomicBool,
}

/// Distributed engine backend.
#[derive(Clone)]
pub struct RqOrchestrator {
    inner: Arc<RqInner>,
}

impl RqOrchestrator {
    pub fn new(
        config: RqOrchestratorConfig,
        store: JobStore,
        pipeline: Arc<dyn DocumentPipeline>,
    ) -> Self {
        Self {
            inner: Arc::new(RqInner {
                config,
                store,
                tracker: TaskTracker::new(),
                retry: RetryPolicy::default(),
                pipeline,
                result_keys: Mutex::new(HashMap::new()),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// The underlying store handle, mainly for harnesses that drive the
    /// worker side directly.
    pub fn store(&self) -> &JobStore {
        &self.inner.store
    }
}

pub(super) fn task_status_from_job(state: JobState) -> TaskStatus {
    match state {
        JobState::Queued => TaskStatus::Pending,
        JobState::Started => TaskStatus::Started,
        JobState::Finished => TaskStatus::Success,
        JobState::Failed => TaskStatus::Failure,
    }
}

impl RqInner {
    fn metadata_key(&self, task_id: TaskId) -> String {
        format!("{}{}:metadata", self.config.key_prefix, task_id)
    }

    fn result_key_key(&self, task_id: TaskId) -> String {
        format!("{}{}:result_key", self.config.key_prefix, task_id)
    }

    /// Write the durable projection through, with the results TTL. Failures
    /// are logged and swallowed: the projection is a cache, the queue stays
    /// authoritative.
    async fn store_projection(&self, task: &Task) {
        let projection = TaskProjection::of(task);
        let bytes = match serde_json::to_vec(&projection) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(task_id = %task.task_id, error = %err, "Failed to encode projection");
                return;
            }
        };
        let key = self.metadata_key(task.task_id);
        let ttl = self.config.results_ttl;
        let result = self
            .retry
            .run("store_projection", || {
                self.store.put_value(&key, bytes.clone(), ttl)
            })
            .await;
        if let Err(err) = result {
            warn!(task_id = %task.task_id, error = %err, "Failed to store projection");
        }
    }

    async fn read_projection(&self, task_id: TaskId) -> Option<TaskProjection> {
        let key = self.metadata_key(task_id);
        let bytes = match self
            .retry
            .run("read_projection", || self.store.get_value(&key))
            .await
        {
            Ok(bytes) => bytes?,
            Err(err) => {
                warn!(task_id = %task_id, error = %err, "Failed to read projection");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(projection) => Some(projection),
            Err(err) => {
                warn!(task_id = %task_id, error = %err, "Malformed projection, ignoring");
                None
            }
        }
    }

    /// Remember where the store keeps the task's result, locally and in the
    /// durable projection namespace.
    async fn record_result_key(&self, task_id: TaskId, result_key: &str) {
        let known = {
            let mut keys = self.result_keys.lock().unwrap_or_else(|p| p.into_inner());
            keys.insert(task_id, result_key.to_string())
                .as_deref()
                .is_some_and(|existing| existing == result_key)
        };
        if known {
            return;
        }
        let key = self.result_key_key(task_id);
        let ttl = self.config.results_ttl;
        if let Err(err) = self
            .store
            .put_value(&key, result_key.as_bytes().to_vec(), ttl)
            .await
        {
            warn!(task_id = %task_id, error = %err, "Failed to store result key");
        }
    }

    /// Resolve the task's result key from the local map or the store.
    async fn resolve_result_key(&self, task_id: TaskId) -> DocflowResult<Option<String>> {
        if let Some(key) = self
            .result_keys
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&task_id)
            .cloned()
        {
            return Ok(Some(key));
        }
        let key_key = self.result_key_key(task_id);
        let bytes = self
            .retry
            .run("read_result_key", || self.store.get_value(&key_key))
            .await
            .map_err(DocflowError::from)?;
        let Some(bytes) = bytes else {
            return Ok(None);
        };
        let key = String::from_utf8(bytes)
            .map_err(|_| DocflowError::internal("result key is not valid utf-8"))?;
        self.result_keys
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(task_id, key.clone());
        Ok(Some(key))
    }

    /// Drop all process-local tracking for a task.
    fn forget(&self, task_id: TaskId) {
        self.tracker.forget(task_id);
        self.result_keys
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&task_id);
    }

    /// Full eviction: store-side job, projection, result payload, and
    /// process-local tracking. Idempotent.
    async fn delete_everywhere(&self, task_id: TaskId) {
        // Resolve the result key before its pointer is deleted.
        let result_key = self.resolve_result_key(task_id).await.ok().flatten();

        if let Err(err) = self.store.delete_job(task_id).await {
            warn!(task_id = %task_id, error = %err, "Failed to delete job record");
        }
        if let Err(err) = self.store.delete_value(&self.metadata_key(task_id)).await {
            warn!(task_id = %task_id, error = %err, "Failed to delete projection");
        }
        if let Err(err) = self.store.delete_value(&self.result_key_key(task_id)).await {
            warn!(task_id = %task_id, error = %err, "Failed to delete result key");
        }
        if let Some(key) = result_key {
            if let Err(err) = self.store.delete_value(&key).await {
                warn!(task_id = %task_id, error = %err, "Failed to delete result payload");
            }
        }
        self.result_keys
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&task_id);
        self.tracker.remove(task_id);
    }
}

#[async_trait]
impl Orchestrator for RqOrchestrator {
    async fn enqueue(&self, request: TaskRequest) -> DocflowResult<Task> {
        request.validate()?;

        if self.inner.config.queue_max_size > 0 {
            let depth = self
                .inner
                .store
                .queue_depth()
                .await
                .map_err(DocflowError::from)?;
            if depth >= self.inner.config.queue_max_size {
                return Err(DocflowError::queue_full(format!(
                    "{depth} jobs queued, limit {}",
                    self.inner.config.queue_max_size
                )));
            }
        }

        let task = Task::new(
            TaskId::new(),
            request.task_type,
            request.sources,
            request.options,
            request.target,
        );
        let payload = serde_json::to_value(&task)?;
        self.inner
            .store
            .enqueue_job(NewJob {
                job_id: task.task_id,
                payload,
                timeout: self.inner.config.job_timeout,
                result_ttl: self.inner.config.results_ttl,
                failure_ttl: self.inner.config.failure_ttl,
            })
            .await
            .map_err(DocflowError::from)?;

        // Local cache is unbounded here; the bound is enforced at the store.
        self.inner.tracker.admit(task.clone(), 0)?;
        self.inner.store_projection(&task).await;
        debug!(task_id = %task.task_id, task_type = %task.task_type, "Job enqueued to store");
        Ok(task)
    }

    async fn task_status(&self, task_id: TaskId, wait: Duration) -> DocflowResult<Task> {
        let snapshot = reconciler::reconcile(&self.inner, task_id).await?;
        if wait.is_zero() || snapshot.is_terminal() {
            return Ok(snapshot);
        }

        let initial = snapshot.task_status;
        let deadline = tokio::time::Instant::now() + wait;
        let mut latest = snapshot;
        while tokio::time::Instant::now() < deadline {
            let remaining = deadline - tokio::time::Instant::now();
            let step = remaining.min(self.inner.config.status_poll_interval);
            // Wake early on a locally published transition, otherwise fall
            // back to re-reconciling against the store.
            if let Some(update) = self.inner.tracker.wait_for_status_change(task_id, step).await
            {
                if update.task_status != initial {
                    return Ok(update);
                }
            }
            latest = reconciler::reconcile(&self.inner, task_id).await?;
            if latest.is_terminal() || latest.task_status != initial {
                return Ok(latest);
            }
        }
        Ok(latest)
    }

    async fn queue_size(&self) -> DocflowResult<usize> {
        self.inner
            .store
            .queue_depth()
            .await
            .map_err(DocflowError::from)
    }

    async fn queue_position(&self, task_id: TaskId) -> DocflowResult<Option<usize>> {
        let position = self
            .inner
            .store
            .job_position(task_id)
            .await
            .map_err(DocflowError::from)?;
        Ok(position.map(|p| p + 1))
    }

    async fn task_result(&self, task_id: TaskId) -> DocflowResult<Option<Arc<TaskResult>>> {
        let Some(result_key) = self.inner.resolve_result_key(task_id).await? else {
            return Ok(None);
        };
        let bytes = self
            .inner
            .retry
            .run("read_result", || self.inner.store.get_value(&result_key))
            .await
            .map_err(DocflowError::from)?;
        let Some(bytes) = bytes else {
            // Evicted by TTL or a previous single-use fetch.
            return Ok(None);
        };
        let result: TaskResult = serde_json::from_slice(&bytes)
            .map_err(|e| DocflowError::internal(format!("malformed stored result: {e}")))?;
        let result = Arc::new(result);

        if self.inner.config.single_use_results && self.inner.tracker.try_begin_removal(task_id) {
            let inner = self.inner.clone();
            let delay = self.inner.config.result_removal_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                debug!(task_id = %task_id, "Single-use removal firing");
                inner.delete_everywhere(task_id).await;
            });
        }
        Ok(Some(result))
    }

    async fn delete_task(&self, task_id: TaskId) -> DocflowResult<()> {
        self.inner.delete_everywhere(task_id).await;
        Ok(())
    }

    async fn clear_results(&self, older_than: Duration) -> DocflowResult<usize> {
        let removed = self.inner.tracker.clear_terminal_older_than(older_than);
        for task in &removed {
            self.inner.delete_everywhere(task.task_id).await;
        }
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
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        {
            let inner = self.inner.clone();
            let config = self.inner.config.reaper;
            tokio::spawn(async move {
                reaper::run(config, move || {
                    inner
                        .tracker
                        .clear_terminal_older_than(inner.config.reaper.max_age)
                        .len()
                })
                .await;
            });
        }

        if self.inner.config.dev_mode {
            let bridge: ProgressBridge = {
                let inner = self.inner.clone();
                Arc::new(move |task_id, update| {
                    inner.tracker.apply_progress(task_id, update);
                })
            };
            for index in 0..self.inner.config.num_workers.max(1) {
                let store = self.inner.store.clone();
                let pipeline = self.inner.pipeline.clone();
                let config = RqWorkerConfig {
                    key_prefix: self.inner.config.key_prefix.clone(),
                    worker_name: format!("embedded-{index}"),
                    ..RqWorkerConfig::default()
                };
                let bridge = bridge.clone();
                tokio::spawn(worker::run_worker(store, pipeline, config, Some(bridge)));
            }
            info!(
                num_workers = self.inner.config.num_workers.max(1),
                "Embedded job-store workers started (dev mode)"
            );
        }
        Ok(())
    }

    async fn check_connection(&self) -> DocflowResult<()> {
        self.inner
            .store
            .ping()
            .await
            .map_err(|e| DocflowError::upstream(format!("job store unreachable: {e}")))?;

        if !self.inner.config.dev_mode {
            let workers = self
                .inner
                .store
                .worker_count()
                .await
                .map_err(DocflowError::from)?;
            if workers == 0 {
                return Err(DocflowError::upstream(
                    "no workers connected to the job store",
                ));
            }
        }
        Ok(())
    }

    async fn subscribe_progress(&self, task_id: TaskId) -> DocflowResult<ProgressStream> {
        // Hydrate the cache (and surface TaskNotFound) before subscribing.
        reconciler::reconcile(&self.inner, task_id).await?;
        self.inner
            .tracker
            .subscribe(task_id)
            .map(ReceiverStream::new)
            .ok_or_else(|| DocflowError::task_not_found(task_id))
    }

    async fn apply_progress(&self, task_id: TaskId, update: ProgressUpdate) -> DocflowResult<()> {
        if !self.inner.tracker.contains(task_id) {
            reconciler::reconcile(&self.inner, task_id).await?;
        }
        let snapshot = self
            .inner
            .tracker
            .apply_progress(task_id, update)
            .ok_or_else(|| DocflowError::task_not_found(task_id))?;
        self.inner.store_projection(&snapshot).await;
        Ok(())
    }
}
