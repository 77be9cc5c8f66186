//! # HTTP Surface
//!
//! Thin axum presentation layer over the orchestrator contract. Handlers
//! decode request bodies, invoke the engine, and map error kinds to status
//! codes; they never hold orchestration state of their own.

mod dto;
mod handlers;

pub use dto::{ApiError, SubmitRequest, TaskStatusResponse};

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use docflow_shared::config::DocflowConfig;
use docflow_shared::error::{DocflowError, DocflowResult};

use crate::orchestrator::Orchestrator;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<dyn Orchestrator>,
    pub sync_poll_interval: Duration,
    pub max_sync_wait: Duration,
}

impl AppState {
    pub fn new(config: &DocflowConfig, orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self {
            orchestrator,
            sync_poll_interval: config.sync_poll_interval(),
            max_sync_wait: config.max_sync_wait(),
        }
    }
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/v1/convert/source", post(handlers::convert_source_sync))
        .route(
            "/v1/convert/source/async",
            post(handlers::convert_source_async),
        )
        .route("/v1/chunk/source/async", post(handlers::chunk_source_async))
        .route("/v1/status/poll/{task_id}", get(handlers::poll_status))
        .route("/v1/status/stream/{task_id}", get(handlers::stream_status))
        .route("/v1/result/{task_id}", get(handlers::get_result))
        .route(
            "/v1/callback/task/progress",
            post(handlers::progress_callback),
        )
        .route("/v1/clear/results", get(handlers::clear_results))
        .route("/v1/clear/converters", get(handlers::clear_converters))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve<F>(
    config: &DocflowConfig,
    orchestrator: Arc<dyn Orchestrator>,
    shutdown: F,
) -> DocflowResult<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = router(AppState::new(config, orchestrator));
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|e| DocflowError::internal(format!("bind {}: {e}", config.bind_addr)))?;
    tracing::info!(addr = %config.bind_addr, "HTTP surface listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| DocflowError::internal(format!("server error: {e}")))
}
