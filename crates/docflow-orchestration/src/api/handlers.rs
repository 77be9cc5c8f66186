//! Endpoint handlers: decode, call the orchestrator, map the error kind.
//! No orchestration logic lives here.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use tracing::debug;

use docflow_shared::error::DocflowError;
use docflow_shared::types::{TaskId, TaskResult, TaskStatus, TaskTarget, TaskType};

use crate::orchestrator::TaskRequest;

use super::dto::{
    ApiError, ClearQuery, ClearResponse, HealthResponse, PresignedDeliveryResponse,
    ProgressCallbackRequest, ProgressCallbackResponse, StatusQuery, SubmitRequest,
    TaskStatusResponse,
};
use super::AppState;

pub(super) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

pub(super) async fn convert_source_async(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<TaskStatusResponse>, ApiError> {
    submit(state, TaskType::Convert, request).await
}

pub(super) async fn chunk_source_async(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<TaskStatusResponse>, ApiError> {
    submit(state, TaskType::Chunk, request).await
}

async fn submit(
    state: AppState,
    task_type: TaskType,
    request: SubmitRequest,
) -> Result<Json<TaskStatusResponse>, ApiError> {
    let task = state
        .orchestrator
        .enqueue(TaskRequest::new(
            task_type,
            request.sources,
            request.options,
            request.target,
        ))
        .await?;
    let position = state.orchestrator.queue_position(task.task_id).await.ok().flatten();
    let queue_size = state.orchestrator.queue_size().await.ok();
    Ok(Json(TaskStatusResponse::from_task(
        &task, position, queue_size,
    )))
}

/// Synchronous wait-in-request flow: enqueue, poll until terminal or the
/// configured bound elapses.
pub(super) async fn convert_source_sync(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<Response, ApiError> {
    let task = state
        .orchestrator
        .enqueue(TaskRequest::new(
            TaskType::Convert,
            request.sources,
            request.options,
            request.target,
        ))
        .await?;
    let task_id = task.task_id;

    let deadline = tokio::time::Instant::now() + state.max_sync_wait;
    let mut snapshot = task;
    while !snapshot.is_terminal() {
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return Err(DocflowError::timeout(format!(
                "conversion did not finish within {:.0} seconds",
                state.max_sync_wait.as_secs_f64()
            ))
            .into());
        }
        let step = state.sync_poll_interval.min(deadline - now);
        snapshot = state.orchestrator.task_status(task_id, step).await?;
    }

    if snapshot.task_status == TaskStatus::Failure {
        return Err(DocflowError::pipeline(
            snapshot
                .error_message
                .unwrap_or_else(|| "conversion failed".to_string()),
        )
        .into());
    }

    let result = state.orchestrator.task_result(task_id).await?;
    match result {
        Some(result) => Ok(deliver_result(
            &snapshot.target,
            &result,
            &snapshot.processing_meta,
        )),
        None => Err(DocflowError::internal("result missing after success").into()),
    }
}

pub(super) async fn poll_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<TaskStatusResponse>, ApiError> {
    let task_id: TaskId = task_id.parse()?;
    let wait = Duration::from_secs_f64(query.wait.max(0.0));
    let task = state.orchestrator.task_status(task_id, wait).await?;
    let position = if task.task_status == TaskStatus::Pending {
        state.orchestrator.queue_position(task_id).await.ok().flatten()
    } else {
        None
    };
    let queue_size = state.orchestrator.queue_size().await.ok();
    Ok(Json(TaskStatusResponse::from_task(
        &task, position, queue_size,
    )))
}

/// One task snapshot per transition, server-sent; the stream closes after
/// the terminal snapshot.
pub(super) async fn stream_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let task_id: TaskId = task_id.parse()?;
    let stream = state.orchestrator.subscribe_progress(task_id).await?;
    let events = stream.map(|task| {
        debug!(task_id = %task.task_id, status = %task.task_status, "Streaming snapshot");
        Event::default().json_data(TaskStatusResponse::from_task(&task, None, None))
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

pub(super) async fn get_result(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Response, ApiError> {
    let task_id: TaskId = task_id.parse()?;
    let task = state.orchestrator.task_status(task_id, Duration::ZERO).await?;

    match task.task_status {
        TaskStatus::Success => {}
        TaskStatus::Failure => {
            let body = Json(serde_json::json!({
                "detail": "Task failed.",
                "error_message": task.error_message,
            }));
            return Ok((StatusCode::UNPROCESSABLE_ENTITY, body).into_response());
        }
        TaskStatus::Pending | TaskStatus::Started => {
            let body = Json(serde_json::json!({
                "detail": "Task result not found. Please wait for a completion status.",
            }));
            return Ok((StatusCode::NOT_FOUND, body).into_response());
        }
    }

    match state.orchestrator.task_result(task_id).await? {
        Some(result) => Ok(deliver_result(&task.target, &result, &task.processing_meta)),
        None => {
            let body = Json(serde_json::json!({
                "detail": "Task result not found. Please wait for a completion status.",
            }));
            Ok((StatusCode::NOT_FOUND, body).into_response())
        }
    }
}

/// Shape the response body by delivery target. Results delivered out of
/// band (presigned put) only get an acknowledgment.
fn deliver_result(
    target: &TaskTarget,
    result: &Arc<TaskResult>,
    meta: &docflow_shared::types::ProcessingMeta,
) -> Response {
    match target {
        TaskTarget::Put { .. } => Json(PresignedDeliveryResponse {
            status: "ok",
            num_converted: meta.num_processed,
            num_succeeded: meta.num_succeeded,
            num_failed: meta.num_failed,
        })
        .into_response(),
        _ => Json(result.as_ref()).into_response(),
    }
}

pub(super) async fn progress_callback(
    State(state): State<AppState>,
    Json(request): Json<ProgressCallbackRequest>,
) -> Result<Json<ProgressCallbackResponse>, ApiError> {
    let task_id: TaskId = request.task_id.parse()?;
    state
        .orchestrator
        .apply_progress(task_id, request.progress)
        .await?;
    Ok(Json(ProgressCallbackResponse::default()))
}

pub(super) async fn clear_results(
    State(state): State<AppState>,
    Query(query): Query<ClearQuery>,
) -> Result<Json<ClearResponse>, ApiError> {
    state
        .orchestrator
        .clear_results(Duration::from_secs(query.older_than))
        .await?;
    Ok(Json(ClearResponse::default()))
}

pub(super) async fn clear_converters(
    State(state): State<AppState>,
) -> Result<Json<ClearResponse>, ApiError> {
    state.orchestrator.clear_converters().await?;
    Ok(Json(ClearResponse::default()))
}
