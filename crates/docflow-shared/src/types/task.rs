//! # Task Model
//!
//! The central record tracking one job end-to-end: identity, lifecycle
//! status, inputs, delivery target, progress counters, and timestamps.
//!
//! Lifecycle: `pending → started → (success | failure)`. A task may skip
//! `started` when a worker transitions it directly. Terminal statuses never
//! transition again in the authoritative store; the one allowed correction
//! is the reconciler upgrading a stale non-terminal projection to `failure`
//! when the queue-side job has disappeared.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DocflowError;
use crate::types::source::TaskSource;
use crate::types::target::TaskTarget;

/// Stable unique task identifier: 128-bit random, lowercase hex with dashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Uuid renders as lowercase hyphenated hex.
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = DocflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| DocflowError::invalid_request(format!("invalid task id: {s}")))
    }
}

/// What kind of work the task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Convert,
    Chunk,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Convert => write!(f, "convert"),
            Self::Chunk => write!(f, "chunk"),
        }
    }
}

/// Task lifecycle status. `Success` and `Failure` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Started,
    Success,
    Failure,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Started => write!(f, "started"),
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

/// Progress counters for a task. `num_processed == num_succeeded + num_failed`
/// holds at every observable point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingMeta {
    #[serde(default)]
    pub num_docs: u32,
    #[serde(default)]
    pub num_processed: u32,
    #[serde(default)]
    pub num_succeeded: u32,
    #[serde(default)]
    pub num_failed: u32,
}

/// Coarse progress reports published by workers while a task runs.
///
/// Counters are monotonically non-decreasing; stale updates are dropped on
/// application rather than rolling counters back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressUpdate {
    SetNumDocs {
        num_docs: u32,
    },
    UpdateProcessed {
        num_processed: u32,
        num_succeeded: u32,
        num_failed: u32,
    },
}

impl ProcessingMeta {
    /// Apply a progress update, keeping counters monotonic.
    pub fn apply(&mut self, update: ProgressUpdate) {
        match update {
            ProgressUpdate::SetNumDocs { num_docs } => {
                self.num_docs = self.num_docs.max(num_docs);
            }
            ProgressUpdate::UpdateProcessed {
                num_processed,
                num_succeeded,
                num_failed,
            } => {
                if num_processed >= self.num_processed {
                    self.num_processed = num_processed;
                    self.num_succeeded = num_succeeded;
                    self.num_failed = num_failed;
                }
            }
        }
    }
}

/// The single central entity: one orchestrator record per submitted job.
///
/// `scratch_dir` is process-local ownership state and never crosses the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub task_status: TaskStatus,
    #[serde(default)]
    pub sources: Vec<TaskSource>,
    #[serde(default)]
    pub options: serde_json::Value,
    #[serde(default)]
    pub target: TaskTarget,
    #[serde(default)]
    pub processing_meta: ProcessingMeta,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip)]
    pub scratch_dir: Option<PathBuf>,
}

impl Task {
    /// Construct a fresh `pending` task.
    pub fn new(
        task_id: TaskId,
        task_type: TaskType,
        sources: Vec<TaskSource>,
        options: serde_json::Value,
        target: TaskTarget,
    ) -> Self {
        Self {
            task_id,
            task_type,
            task_status: TaskStatus::Pending,
            sources,
            options,
            target,
            processing_meta: ProcessingMeta::default(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error_message: None,
            scratch_dir: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.task_status.is_terminal()
    }

    /// Transition to a new status, maintaining the timestamp invariants:
    /// `started_at` is set on the first `started` observation and
    /// `finished_at` is set exactly when the task becomes terminal.
    ///
    /// Returns `false` without modifying anything when the task is already
    /// terminal; terminal states never transition again.
    pub fn transition(&mut self, status: TaskStatus) -> bool {
        if self.task_status.is_terminal() {
            return false;
        }
        self.task_status = status;
        let now = Utc::now();
        match status {
            TaskStatus::Started => {
                self.started_at.get_or_insert(now);
            }
            TaskStatus::Success => {
                self.finished_at = Some(now);
                self.error_message = None;
            }
            TaskStatus::Failure => {
                self.finished_at = Some(now);
            }
            TaskStatus::Pending => {}
        }
        true
    }

    /// Per-task processing deadline, read from the opaque options blob.
    pub fn document_timeout(&self) -> Option<std::time::Duration> {
        self.options
            .get("document_timeout")
            .and_then(|v| v.as_f64())
            .filter(|secs| *secs > 0.0)
            .map(std::time::Duration::from_secs_f64)
    }
}

/// Durable, TTL-bounded projection of a [`Task`] held in the external store
/// for cross-restart visibility. Deliberately smaller than the full task:
/// sources and options stay in the queue-side job payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProjection {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub task_status: TaskStatus,
    #[serde(default)]
    pub processing_meta: ProcessingMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskProjection {
    pub fn of(task: &Task) -> Self {
        Self {
            task_id: task.task_id,
            task_type: task.task_type,
            task_status: task.task_status,
            processing_meta: task.processing_meta,
            error_message: task.error_message.clone(),
            created_at: task.created_at,
            finished_at: task.finished_at,
        }
    }

    /// Rehydrate a task from the projection alone. Sources, options, and
    /// target are not persisted in the projection; the result carries their
    /// defaults and is suitable for status reporting only.
    pub fn into_task(self) -> Task {
        Task {
            task_id: self.task_id,
            task_type: self.task_type,
            task_status: self.task_status,
            sources: Vec::new(),
            options: serde_json::Value::Null,
            target: TaskTarget::default(),
            processing_meta: self.processing_meta,
            created_at: self.created_at,
            started_at: None,
            finished_at: self.finished_at,
            error_message: self.error_message,
            scratch_dir: None,
        }
    }
}
