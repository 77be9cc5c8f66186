//! # docflow Server
//!
//! Standalone deployment target for the orchestration service. Loads
//! configuration, builds the configured engine, starts its worker loop, and
//! serves the HTTP surface until SIGINT/SIGTERM.
//!
//! The bundled pipeline backend is the echo stub; real deployments link
//! their conversion stack and pass it to
//! [`docflow_orchestration::build_orchestrator`].

use std::sync::Arc;

use tokio::signal;
use tracing::{error, info};

use docflow_orchestration::api;
use docflow_orchestration::pipeline::echo::EchoPipeline;
use docflow_shared::config::DocflowConfig;
use docflow_shared::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load local env vars if present, then logging before anything else.
    let _ = dotenvy::dotenv();
    logging::init_tracing();

    info!("Starting docflow server...");
    info!("   Version: {}", env!("CARGO_PKG_VERSION"));

    let config = DocflowConfig::load().map_err(|e| anyhow::anyhow!("{e}"))?;
    info!(engine = ?config.engine, bind_addr = %config.bind_addr, "Configuration loaded");

    let pipeline = Arc::new(EchoPipeline);
    let orchestrator = docflow_orchestration::build_orchestrator(&config, pipeline)
        .await
        .map_err(|e| anyhow::anyhow!("failed to build orchestrator: {e}"))?;

    if let Err(err) = orchestrator.check_connection().await {
        // Workers may register later; report but keep serving.
        error!(error = %err, "Connection check failed at startup");
    }

    orchestrator
        .process_queue()
        .await
        .map_err(|e| anyhow::anyhow!("failed to start worker loop: {e}"))?;
    info!("Worker loop started");

    match api::serve(&config, orchestrator, shutdown_signal()).await {
        Ok(()) => info!("docflow server shutdown complete"),
        Err(err) => {
            error!(error = %err, "Server exited with error");
            return Err(anyhow::anyhow!("{err}"));
        }
    }
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received SIGTERM");
        },
    }
}
