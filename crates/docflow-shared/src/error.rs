//! # Error Taxonomy
//!
//! Error kinds carried through the orchestrator interfaces. Transport layers
//! map them to status codes; the kinds themselves stay transport-agnostic.
//!
//! ## Propagation policy
//!
//! - Pipeline errors become a terminal `failure` on the task, never a
//!   call-time error for the enqueue caller.
//! - Transient infrastructure errors are retried with bounded backoff (see
//!   [`crate::resilience::RetryPolicy`]); persistent failures surface as
//!   `UpstreamUnavailable`.
//! - `InvalidRequest` and `Unauthenticated` never produce a task record.

use thiserror::Error;

/// Result alias used across the docflow crates.
pub type DocflowResult<T> = Result<T, DocflowError>;

/// Error kinds for the orchestration core.
#[derive(Debug, Error)]
pub enum DocflowError {
    /// Malformed input: empty sources, mutually exclusive options, bad ids.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Admission rejected by a bounded queue.
    #[error("Queue is full: {0}")]
    QueueFull(String),

    /// No record of the task in queue, durable projection, or cache.
    #[error("Task {0} not found")]
    TaskNotFound(String),

    /// Credential missing or invalid, surfaced unchanged from the auth boundary.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Synchronous wait exceeded its bound, or a per-task deadline elapsed.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Queue service or object store unreachable after retries.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The conversion pipeline returned an error.
    #[error("Pipeline failure: {0}")]
    PipelineFailure(String),

    /// Invariant violations and other bugs that should not happen in normal operation.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DocflowError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn queue_full(msg: impl Into<String>) -> Self {
        Self::QueueFull(msg.into())
    }

    pub fn task_not_found(task_id: impl std::fmt::Display) -> Self {
        Self::TaskNotFound(task_id.to_string())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::UpstreamUnavailable(msg.into())
    }

    pub fn pipeline(msg: impl Into<String>) -> Self {
        Self::PipelineFailure(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether a retry by the caller could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::QueueFull(_) | Self::Timeout(_) | Self::UpstreamUnavailable(_)
        )
    }
}

impl From<serde_json::Error> for DocflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("serialization error: {err}"))
    }
}
