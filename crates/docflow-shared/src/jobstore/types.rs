//! Shared types for the durable job store: job records, fetch outcomes, and
//! the store error taxonomy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::DocflowError;
use crate::types::{ProcessingMeta, TaskId};

/// Queue-side job lifecycle, as the store reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Started,
    Finished,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

/// The durable job record the store keeps per task. The payload is the
/// serialized task (minus process-local fields) that workers deserialize and
/// run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: TaskId,
    pub state: JobState,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub processing_meta: ProcessingMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Processing deadline workers enforce for this job, in seconds.
    pub timeout_seconds: u64,
    /// Retention applied to the record and result once the job finishes.
    pub result_ttl_seconds: u64,
    /// Retention applied to the record when the job fails.
    pub failure_ttl_seconds: u64,
}

/// Parameters for admitting a new job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_id: TaskId,
    pub payload: serde_json::Value,
    pub timeout: std::time::Duration,
    pub result_ttl: std::time::Duration,
    pub failure_ttl: std::time::Duration,
}

impl NewJob {
    pub(crate) fn into_record(self) -> JobRecord {
        JobRecord {
            job_id: self.job_id,
            state: JobState::Queued,
            payload: self.payload,
            processing_meta: ProcessingMeta::default(),
            result_key: None,
            error_message: None,
            enqueued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            timeout_seconds: self.timeout.as_secs(),
            result_ttl_seconds: self.result_ttl.as_secs(),
            failure_ttl_seconds: self.failure_ttl.as_secs(),
        }
    }
}

/// Outcome of a job lookup. `Gone` is the store's explicit "no such job"
/// signal, distinct from transient errors which surface as
/// [`JobStoreError`].
#[derive(Debug, Clone)]
pub enum JobFetch {
    Found(JobRecord),
    Gone,
}

/// Errors from the job store client.
#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("job store connection error: {0}")]
    Connection(String),

    #[error("job store serialization error: {0}")]
    Serialization(String),

    #[error("no such job: {0}")]
    NoSuchJob(TaskId),
}

impl JobStoreError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }
}

impl From<redis::RedisError> for JobStoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::Connection(err.to_string())
    }
}

impl From<serde_json::Error> for JobStoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<JobStoreError> for DocflowError {
    fn from(err: JobStoreError) -> Self {
        match err {
            JobStoreError::NoSuchJob(id) => DocflowError::task_not_found(id),
            other => DocflowError::upstream(other.to_string()),
        }
    }
}
