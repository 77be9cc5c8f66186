//! # Engine Factory
//!
//! Explicit process-lifecycle construction of the configured engine. The
//! returned handle is created once at startup, shared by reference, and
//! torn down with the process; there is no hidden process-wide singleton.

use std::sync::Arc;

use tracing::info;

use docflow_shared::config::{DocflowConfig, EngineKind};
use docflow_shared::error::DocflowResult;
use docflow_shared::jobstore::JobStore;

use crate::engines::local::{LocalOrchestrator, LocalOrchestratorConfig};
use crate::engines::rq::{RqOrchestrator, RqOrchestratorConfig};
use crate::orchestrator::Orchestrator;
use crate::pipeline::DocumentPipeline;

/// Build the engine selected by the configuration.
pub async fn build_orchestrator(
    config: &DocflowConfig,
    pipeline: Arc<dyn DocumentPipeline>,
) -> DocflowResult<Arc<dyn Orchestrator>> {
    match config.engine {
        EngineKind::Local => {
            info!(num_workers = config.num_workers, "Building local engine");
            Ok(Arc::new(LocalOrchestrator::new(
                LocalOrchestratorConfig::from(config),
                pipeline,
            )))
        }
        EngineKind::Rq => {
            info!(redis_url = %config.redis_url, dev_mode = config.dev_mode, "Building distributed engine");
            let store = JobStore::connect_redis(&config.redis_url, &config.key_prefix).await?;
            Ok(Arc::new(RqOrchestrator::new(
                RqOrchestratorConfig::from(config),
                store,
                pipeline,
            )))
        }
    }
}

/// Build the distributed engine against an explicit store. Used by tests
/// and embedded deployments that bring their own backend.
pub fn build_rq_orchestrator_with_store(
    config: &DocflowConfig,
    store: JobStore,
    pipeline: Arc<dyn DocumentPipeline>,
) -> Arc<dyn Orchestrator> {
    Arc::new(RqOrchestrator::new(
        RqOrchestratorConfig::from(config),
        store,
        pipeline,
    ))
}
