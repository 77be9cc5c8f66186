//! # Task Tracking & Subscriber Bus
//!
//! Process-local state both engines embed: the hot task map, the pending
//! order (queue positions), per-task subscriber lists, in-process result
//! handles, cooperative cancellation handles, and the single-use-removal
//! guard.
//!
//! ## Lock discipline
//!
//! One coarse mutex guards the whole state. Every read-modify-write takes it
//! for the full compound operation; snapshot reads clone under the lock and
//! release immediately. Subscriber delivery happens strictly outside the
//! lock with non-blocking sends: a slow subscriber drops intermediate
//! snapshots, but a terminal snapshot is re-sent on a spawned task so it
//! arrives at least once best-effort.
//!
//! Subscribers are indexed here by task id rather than held by the task,
//! so a task record never references its own subscriber list.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use docflow_shared::error::{DocflowError, DocflowResult};
use docflow_shared::types::{ProgressUpdate, Task, TaskId, TaskResult, TaskStatus};

/// Buffer size of each subscriber channel. Small on purpose: intermediate
/// snapshots are droppable, the terminal one is re-sent.
const SUBSCRIBER_BUFFER: usize = 16;

#[derive(Default)]
struct TrackerState {
    tasks: HashMap<TaskId, Task>,
    pending_order: Vec<TaskId>,
    results: HashMap<TaskId, Arc<TaskResult>>,
    subscribers: HashMap<TaskId, Vec<mpsc::Sender<Task>>>,
    running: HashMap<TaskId, CancellationToken>,
    removal_scheduled: HashSet<TaskId>,
}

/// Shared tracking state for one orchestrator instance.
#[derive(Default)]
pub struct TaskTracker {
    state: Mutex<TrackerState>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Admit a task. When `max_pending` is nonzero and that many tasks are
    /// already pending, admission fails with `QueueFull` and nothing is
    /// recorded.
    pub fn admit(&self, task: Task, max_pending: usize) -> DocflowResult<()> {
        let mut state = self.lock();
        if max_pending > 0 && state.pending_order.len() >= max_pending {
            return Err(DocflowError::queue_full(format!(
                "{} tasks pending, limit {max_pending}",
                state.pending_order.len()
            )));
        }
        let task_id = task.task_id;
        state.pending_order.push(task_id);
        state.tasks.insert(task_id, task);
        Ok(())
    }

    pub fn get(&self, task_id: TaskId) -> Option<Task> {
        self.lock().tasks.get(&task_id).cloned()
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.lock().tasks.contains_key(&task_id)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending_order.len()
    }

    /// 1-based position among pending tasks; `None` once the task has
    /// started, finished, or is unknown.
    pub fn pending_position(&self, task_id: TaskId) -> Option<usize> {
        self.lock()
            .pending_order
            .iter()
            .position(|id| *id == task_id)
            .map(|idx| idx + 1)
    }

    /// Transition a task and publish the new snapshot. Terminal tasks are
    /// left untouched and their current snapshot is returned: a terminal
    /// status in the cache is authoritative and never stomped.
    pub fn update_status(
        &self,
        task_id: TaskId,
        status: TaskStatus,
        error: Option<String>,
    ) -> Option<Task> {
        let snapshot = {
            let mut state = self.lock();
            let task = state.tasks.get_mut(&task_id)?;
            if task.is_terminal() {
                return Some(task.clone());
            }
            task.transition(status);
            if status == TaskStatus::Failure {
                task.error_message = error.or_else(|| Some("unknown error".to_string()));
            }
            let snapshot = task.clone();
            if status != TaskStatus::Pending {
                state.pending_order.retain(|id| *id != task_id);
            }
            snapshot
        };
        self.publish(&snapshot);
        Some(snapshot)
    }

    /// Adopt an externally observed snapshot (queue-side state). The cached
    /// terminal guard applies: if the in-memory task is already terminal the
    /// write is skipped and the cached snapshot returned. Process-local
    /// fields (scratch dir, timestamps already observed) are preserved.
    pub fn adopt(&self, incoming: Task) -> Task {
        let task_id = incoming.task_id;
        let (snapshot, changed) = {
            let mut state = self.lock();
            match state.tasks.get_mut(&task_id) {
                Some(existing) if existing.is_terminal() => (existing.clone(), false),
                Some(existing) => {
                    let changed = existing.task_status != incoming.task_status
                        || existing.processing_meta != incoming.processing_meta;
                    let scratch = existing.scratch_dir.take();
                    *existing = incoming;
                    existing.scratch_dir = scratch;
                    if existing.task_status.is_terminal() && existing.finished_at.is_none() {
                        existing.finished_at = Some(Utc::now());
                    }
                    let snapshot = existing.clone();
                    if snapshot.task_status != TaskStatus::Pending {
                        state.pending_order.retain(|id| *id != task_id);
                    }
                    (snapshot, changed)
                }
                None => {
                    let mut incoming = incoming;
                    if incoming.task_status.is_terminal() && incoming.finished_at.is_none() {
                        incoming.finished_at = Some(Utc::now());
                    }
                    state.tasks.insert(task_id, incoming.clone());
                    (incoming, true)
                }
            }
        };
        if changed {
            self.publish(&snapshot);
        }
        snapshot
    }

    /// Apply a worker progress report and publish. Ignored for terminal or
    /// unknown tasks.
    pub fn apply_progress(&self, task_id: TaskId, update: ProgressUpdate) -> Option<Task> {
        let snapshot = {
            let mut state = self.lock();
            let task = state.tasks.get_mut(&task_id)?;
            if task.is_terminal() {
                return Some(task.clone());
            }
            task.processing_meta.apply(update);
            task.clone()
        };
        self.publish(&snapshot);
        Some(snapshot)
    }

    pub fn set_scratch_dir(&self, task_id: TaskId, path: PathBuf) {
        if let Some(task) = self.lock().tasks.get_mut(&task_id) {
            task.scratch_dir = Some(path);
        }
    }

    pub fn store_result(&self, task_id: TaskId, result: Arc<TaskResult>) {
        self.lock().results.insert(task_id, result);
    }

    pub fn result(&self, task_id: TaskId) -> Option<Arc<TaskResult>> {
        self.lock().results.get(&task_id).cloned()
    }

    /// Register the cancellation handle of a running task.
    pub fn register_running(&self, task_id: TaskId, token: CancellationToken) {
        self.lock().running.insert(task_id, token);
    }

    pub fn clear_running(&self, task_id: TaskId) {
        self.lock().running.remove(&task_id);
    }

    /// Subscribe to snapshots for a task. For an already-terminal task the
    /// stream yields the terminal snapshot and ends. `None` for unknown ids.
    pub fn subscribe(&self, task_id: TaskId) -> Option<mpsc::Receiver<Task>> {
        let mut state = self.lock();
        let task = state.tasks.get(&task_id)?.clone();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        if task.is_terminal() {
            let _ = tx.try_send(task);
        } else {
            state.subscribers.entry(task_id).or_default().push(tx);
        }
        Some(rx)
    }

    /// Long-poll: wait up to `wait` for the task's status to change, then
    /// return the latest snapshot. Returns immediately for terminal tasks
    /// and zero waits. `None` for unknown ids.
    pub async fn wait_for_status_change(&self, task_id: TaskId, wait: Duration) -> Option<Task> {
        let initial = self.get(task_id)?;
        if initial.is_terminal() || wait.is_zero() {
            return Some(initial);
        }
        let Some(mut rx) = self.subscribe(task_id) else {
            return Some(initial);
        };
        // Re-check after subscribing: a transition in the gap would have
        // published before our sender was registered.
        if let Some(current) = self.get(task_id) {
            if current.task_status != initial.task_status {
                return Some(current);
            }
        }
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(snapshot)) => {
                    if snapshot.task_status != initial.task_status {
                        return Some(snapshot);
                    }
                    // Meta-only update; keep waiting for a status change.
                }
                Ok(None) => return self.get(task_id).or(Some(initial)),
                Err(_) => return self.get(task_id).or(Some(initial)),
            }
        }
    }

    /// Mark a task for single-use removal. Returns `true` exactly once per
    /// tracked lifetime of the task, enforcing the at-most-once deletion
    /// contract. The guard entry is cleared by [`Self::remove`].
    pub fn try_begin_removal(&self, task_id: TaskId) -> bool {
        self.lock().removal_scheduled.insert(task_id)
    }

    /// Remove every trace of a task from process-local state, cancel it if
    /// running, and delete its scratch directory. Idempotent; returns the
    /// removed task, if any.
    pub fn remove(&self, task_id: TaskId) -> Option<Task> {
        let (task, token) = {
            let mut state = self.lock();
            let task = state.tasks.remove(&task_id);
            state.pending_order.retain(|id| *id != task_id);
            state.results.remove(&task_id);
            state.subscribers.remove(&task_id);
            state.removal_scheduled.remove(&task_id);
            let token = state.running.remove(&task_id);
            (task, token)
        };
        if let Some(token) = token {
            token.cancel();
        }
        if let Some(task) = &task {
            remove_scratch_dir(task);
        }
        task
    }

    /// Drop in-memory tracking (map entry, result handle, pending order)
    /// without touching scratch state. Used by the reconciler when the
    /// authoritative record has expired and the caller still returns the
    /// last known snapshot.
    pub fn forget(&self, task_id: TaskId) {
        let mut state = self.lock();
        state.tasks.remove(&task_id);
        state.pending_order.retain(|id| *id != task_id);
        state.results.remove(&task_id);
        state.removal_scheduled.remove(&task_id);
    }

    /// Remove every terminal task whose `finished_at` is older than
    /// `older_than`, returning the removed snapshots so engines can clean up
    /// durable state alongside.
    pub fn clear_terminal_older_than(&self, older_than: Duration) -> Vec<Task> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::zero());
        let removed: Vec<Task> = {
            let state = self.lock();
            state
                .tasks
                .values()
                .filter(|task| {
                    task.is_terminal()
                        && task.finished_at.map(|at| at < cutoff).unwrap_or(false)
                })
                .cloned()
                .collect()
        };
        for task in &removed {
            self.remove(task.task_id);
            debug!(task_id = %task.task_id, "Evicted terminal task");
        }
        removed
    }

    /// Snapshot of all known task ids, for diagnostics.
    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().tasks.is_empty()
    }

    /// Deliver a snapshot to the task's subscribers. Non-blocking: a full
    /// subscriber drops intermediate snapshots; terminal snapshots are
    /// re-sent asynchronously. Terminal delivery also closes the
    /// subscription (senders are dropped here).
    fn publish(&self, snapshot: &Task) {
        let terminal = snapshot.is_terminal();
        let senders: Vec<mpsc::Sender<Task>> = {
            let mut state = self.lock();
            let Some(list) = state.subscribers.get_mut(&snapshot.task_id) else {
                return;
            };
            list.retain(|tx| !tx.is_closed());
            let senders = list.clone();
            if terminal {
                state.subscribers.remove(&snapshot.task_id);
            }
            senders
        };
        for tx in senders {
            match tx.try_send(snapshot.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) if terminal => {
                    // The terminal snapshot must land; hand it to a task that
                    // can afford to wait for buffer space.
                    let snapshot = snapshot.clone();
                    tokio::spawn(async move {
                        if tx.send(snapshot).await.is_err() {
                            warn!("Subscriber dropped before terminal snapshot delivery");
                        }
                    });
                }
                Err(_) => {}
            }
        }
    }
}

fn remove_scratch_dir(task: &Task) {
    if let Some(dir) = &task.scratch_dir {
        if let Err(err) = std::fs::remove_dir_all(dir) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(task_id = %task.task_id, path = %dir.display(), error = %err, "Failed to remove scratch dir");
            }
        }
    }
}
