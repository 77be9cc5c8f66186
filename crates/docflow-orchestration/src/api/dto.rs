//! Request and response bodies for the HTTP surface, plus the error kind →
//! status code mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use docflow_shared::error::DocflowError;
use docflow_shared::types::{
    ProcessingMeta, ProgressUpdate, Task, TaskSource, TaskTarget, TaskType,
};

/// A convert or chunk submission. The same shape serves both endpoints; the
/// target defaults to in-body delivery.
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub sources: Vec<TaskSource>,
    #[serde(default)]
    pub options: serde_json::Value,
    #[serde(default)]
    pub target: TaskTarget,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    /// Long-poll bound in seconds; 0 returns immediately.
    #[serde(default)]
    pub wait: f64,
}

#[derive(Debug, Deserialize)]
pub struct ClearQuery {
    /// Evict terminal tasks finished more than this many seconds ago.
    #[serde(default)]
    pub older_than: u64,
}

/// Worker progress callback body.
#[derive(Debug, Deserialize)]
pub struct ProgressCallbackRequest {
    pub task_id: String,
    pub progress: ProgressUpdate,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self { status: "ok" }
    }
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub status: &'static str,
}

impl Default for ClearResponse {
    fn default() -> Self {
        Self { status: "ok" }
    }
}

#[derive(Debug, Serialize)]
pub struct ProgressCallbackResponse {
    pub status: &'static str,
}

impl Default for ProgressCallbackResponse {
    fn default() -> Self {
        Self { status: "ack" }
    }
}

/// The task snapshot shape every status-bearing endpoint returns.
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub task_type: TaskType,
    pub task_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_position: Option<usize>,
    pub task_meta: ProcessingMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl TaskStatusResponse {
    pub fn from_task(task: &Task, position: Option<usize>, queue_size: Option<usize>) -> Self {
        Self {
            task_id: task.task_id.to_string(),
            task_type: task.task_type,
            task_status: task.task_status.to_string(),
            task_position: position,
            task_meta: task.processing_meta,
            queue_size,
            error_message: task.error_message.clone(),
        }
    }
}

/// Acknowledgment returned for presigned-url targets, where the payload
/// itself was uploaded out of band.
#[derive(Debug, Serialize)]
pub struct PresignedDeliveryResponse {
    pub status: &'static str,
    pub num_converted: u32,
    pub num_succeeded: u32,
    pub num_failed: u32,
}

/// Transport-layer wrapper mapping error kinds to HTTP status codes.
#[derive(Debug)]
pub struct ApiError(pub DocflowError);

impl From<DocflowError> for ApiError {
    fn from(err: DocflowError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DocflowError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            DocflowError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            DocflowError::TaskNotFound(_) => StatusCode::NOT_FOUND,
            DocflowError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            DocflowError::QueueFull(_) => StatusCode::TOO_MANY_REQUESTS,
            DocflowError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            DocflowError::PipelineFailure(_) | DocflowError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(serde_json::json!({ "detail": self.0.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_shared::types::TaskId;

    #[test]
    fn test_submit_request_decoding() {
        let request: SubmitRequest = serde_json::from_value(serde_json::json!({
            "sources": [{"kind": "http", "url": "https://example.com/a.pdf"}],
            "options": {"to_formats": ["md"]},
            "target": {"kind": "in_body"}
        }))
        .unwrap();
        assert_eq!(request.sources.len(), 1);
        assert_eq!(request.target, TaskTarget::InBody);
    }

    #[test]
    fn test_submit_request_defaults() {
        let request: SubmitRequest = serde_json::from_value(serde_json::json!({
            "sources": [{"kind": "file", "filename": "a.pdf", "base64": "aGk="}]
        }))
        .unwrap();
        assert_eq!(request.target, TaskTarget::InBody);
        assert!(request.options.is_null());
    }

    #[test]
    fn test_status_response_shape() {
        let task = Task::new(
            TaskId::new(),
            TaskType::Convert,
            vec![],
            serde_json::Value::Null,
            TaskTarget::default(),
        );
        let response = TaskStatusResponse::from_task(&task, Some(1), Some(3));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["task_status"], "pending");
        assert_eq!(json["task_position"], 1);
        assert_eq!(json["queue_size"], 3);
        assert_eq!(json["task_meta"]["num_processed"], 0);
        assert!(json.get("error_message").is_none());
    }
}
