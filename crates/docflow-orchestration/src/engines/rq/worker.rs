//! # Job-Store Worker Contract
//!
//! The loop an out-of-process worker runs against the job store: claim a
//! job, mark it started, invoke the pipeline under the job's deadline, then
//! persist either the result (under a fresh result key, with the results
//! TTL) or the failure. The engine in this crate never calls the pipeline
//! itself; in development mode it spawns this loop in-process instead of a
//! separate worker fleet.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use docflow_shared::jobstore::{JobRecord, JobStore};
use docflow_shared::types::{
    ProcessingMeta, ProgressUpdate, Task, TaskId, TaskResult, TaskType,
};

use crate::pipeline::{DocumentPipeline, PipelineRequest, ProgressHook};

/// Callback a co-located orchestrator registers to see progress updates
/// without a store round-trip.
pub type ProgressBridge = Arc<dyn Fn(TaskId, ProgressUpdate) + Send + Sync>;

/// Worker loop settings.
#[derive(Debug, Clone)]
pub struct RqWorkerConfig {
    /// Store key prefix; result payloads land under `{prefix}result:{id}`.
    pub key_prefix: String,
    /// Idle sleep between empty claims.
    pub poll_interval: Duration,
    /// Heartbeat registration TTL.
    pub heartbeat_ttl: Duration,
    pub worker_name: String,
}

impl Default for RqWorkerConfig {
    fn default() -> Self {
        Self {
            key_prefix: "docflow:tasks:".to_string(),
            poll_interval: Duration::from_millis(250),
            heartbeat_ttl: Duration::from_secs(30),
            worker_name: "worker-0".to_string(),
        }
    }
}

/// Consume jobs until the process ends.
pub async fn run_worker(
    store: JobStore,
    pipeline: Arc<dyn DocumentPipeline>,
    config: RqWorkerConfig,
    bridge: Option<ProgressBridge>,
) {
    info!(worker = %config.worker_name, "Job-store worker started");
    loop {
        if let Err(err) = store
            .register_worker(&config.worker_name, config.heartbeat_ttl)
            .await
        {
            warn!(worker = %config.worker_name, error = %err, "Heartbeat registration failed");
        }

        match store.claim_next_job().await {
            Ok(Some(record)) => {
                process_job(&store, &pipeline, &config, record, bridge.as_ref()).await;
            }
            Ok(None) => {
                tokio::time::sleep(config.poll_interval).await;
            }
            Err(err) => {
                warn!(worker = %config.worker_name, error = %err, "Claim failed, backing off");
                tokio::time::sleep(config.poll_interval).await;
            }
        }
    }
}

async fn process_job(
    store: &JobStore,
    pipeline: &Arc<dyn DocumentPipeline>,
    config: &RqWorkerConfig,
    record: JobRecord,
    bridge: Option<&ProgressBridge>,
) {
    let job_id = record.job_id;
    if let Err(err) = store.mark_job_started(job_id).await {
        warn!(job_id = %job_id, error = %err, "Could not mark job started");
    }

    let task: Task = match serde_json::from_value(record.payload.clone()) {
        Ok(task) => task,
        Err(err) => {
            error!(job_id = %job_id, error = %err, "Malformed job payload");
            let _ = store
                .fail_job(
                    job_id,
                    &format!("malformed job payload: {err}"),
                    ProcessingMeta::default(),
                )
                .await;
            return;
        }
    };

    let meta = Arc::new(Mutex::new(ProcessingMeta::default()));
    let progress: ProgressHook = {
        let meta = meta.clone();
        let bridge = bridge.cloned();
        Arc::new(move |update| {
            meta.lock().unwrap_or_else(|p| p.into_inner()).apply(update);
            if let Some(bridge) = &bridge {
                bridge(job_id, update);
            }
        })
    };

    let deadline = task
        .document_timeout()
        .unwrap_or(Duration::from_secs(record.timeout_seconds.max(1)));
    let token = CancellationToken::new();
    let request = PipelineRequest {
        task_id: job_id,
        sources: task.sources.clone(),
        options: task.options.clone(),
        scratch_dir: None,
        progress,
        cancel: token.clone(),
    };

    debug!(job_id = %job_id, task_type = %task.task_type, "Job started");
    let invocation = async {
        match task.task_type {
            TaskType::Convert => pipeline.convert(request).await.map(TaskResult::Convert),
            TaskType::Chunk => pipeline.chunk(request).await.map(TaskResult::Chunk),
        }
    };

    let outcome = tokio::time::timeout(deadline, invocation).await;
    let mut final_meta = *meta.lock().unwrap_or_else(|p| p.into_inner());

    match outcome {
        Ok(Ok(result)) => {
            if final_meta.num_processed == 0 {
                let count = result.document_count();
                final_meta.apply(ProgressUpdate::SetNumDocs { num_docs: count });
                final_meta.apply(ProgressUpdate::UpdateProcessed {
                    num_processed: count,
                    num_succeeded: count,
                    num_failed: 0,
                });
            }
            let result_key = format!("{}result:{}", config.key_prefix, job_id);
            match serde_json::to_vec(&result) {
                Ok(bytes) => {
                    if let Err(err) = store
                        .complete_job(job_id, &result_key, bytes, final_meta)
                        .await
                    {
                        error!(job_id = %job_id, error = %err, "Failed to persist result");
                    } else {
                        debug!(job_id = %job_id, "Job finished");
                    }
                }
                Err(err) => {
                    let _ = store
                        .fail_job(job_id, &format!("result encoding failed: {err}"), final_meta)
                        .await;
                }
            }
        }
        Ok(Err(err)) => {
            warn!(job_id = %job_id, error = %err, "Job failed in pipeline");
            if let Err(store_err) = store.fail_job(job_id, &err.to_string(), final_meta).await {
                error!(job_id = %job_id, error = %store_err, "Failed to persist job failure");
            }
        }
        Err(_) => {
            token.cancel();
            let message = format!(
                "Processing timed out after {:.1} seconds",
                deadline.as_secs_f64()
            );
            warn!(job_id = %job_id, timeout_secs = deadline.as_secs_f64(), "Job timed out");
            if let Err(store_err) = store.fail_job(job_id, &message, final_meta).await {
                error!(job_id = %job_id, error = %store_err, "Failed to persist job timeout");
            }
        }
    }
}
