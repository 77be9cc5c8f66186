//! # State Reconciler
//!
//! Merges the three sources of truth for a distributed task (the store's
//! job record, the durable projection, and the in-memory cache) into one
//! consistent answer. They diverge when workers crash, queue entries expire,
//! the store partitions, or a completion has not reached the projection yet.
//!
//! The resolution order for a status query:
//!
//! 1. A cached terminal task wins outright. It may have been produced by an
//!    out-of-band path (e.g. a watchdog-published failure) and a stale queue
//!    snapshot must never overwrite it.
//! 2. Query the store. A hit is authoritative: adopt it, write the
//!    projection through, return. "No such job" sets `job_is_gone`;
//!    transport errors are transient and leave it unset.
//! 3. Read the projection.
//!    - terminal + gone: the job completed and its record expired; drop
//!      tracking and return the projection.
//!    - non-terminal + gone: **orphan**. The one allowed
//!      non-terminal → terminal correction: synthesize a failure so clients
//!      are never stuck forever.
//!    - non-terminal + transient: revalidate once against the store; adopt
//!      a fresh answer if it differs, else return the projection as-is.
//!    - miss + gone: `TaskNotFound`, dropping any in-memory reference.
//!    - miss + transient: fall back to the in-memory cache; the client
//!      retries against whatever we last knew.

use tracing::{debug, info, warn};

use docflow_shared::error::{DocflowError, DocflowResult};
use docflow_shared::jobstore::{JobFetch, JobRecord};
use docflow_shared::types::{Task, TaskId, TaskStatus};

use super::{task_status_from_job, RqInner};

/// Produce the current consistent snapshot for `task_id`.
pub(super) async fn reconcile(inner: &RqInner, task_id: TaskId) -> DocflowResult<Task> {
    if let Some(cached) = inner.tracker.get(task_id) {
        if cached.is_terminal() {
            debug!(task_id = %task_id, status = %cached.task_status, "Cached terminal status is authoritative");
            inner.store_projection(&cached).await;
            return Ok(cached);
        }
    }

    let job_is_gone = match inner
        .retry
        .run("fetch_job", || inner.store.fetch_job(task_id))
        .await
    {
        Ok(JobFetch::Found(record)) => {
            return adopt_record(inner, task_id, record).await;
        }
        Ok(JobFetch::Gone) => {
            debug!(task_id = %task_id, "Job record gone from store");
            true
        }
        Err(err) => {
            warn!(task_id = %task_id, error = %err, "Store query failed, reconciling from projection");
            false
        }
    };

    let projection = inner.read_projection(task_id).await;

    match (projection, job_is_gone) {
        (Some(projection), true) if projection.task_status.is_terminal() => {
            // Normal end of life: the job completed and its queue record
            // expired. Tracking is no longer needed.
            info!(
                task_id = %task_id,
                status = %projection.task_status,
                "Job record expired after completion, dropping tracking"
            );
            inner.forget(task_id);
            Ok(projection.into_task())
        }
        (Some(projection), true) => {
            let old_status = projection.task_status;
            warn!(
                task_id = %task_id,
                old_status = %old_status,
                "Queue record lost while task was in flight, reclassifying as failure"
            );
            let mut task = projection.into_task();
            task.transition(TaskStatus::Failure);
            task.error_message = Some(format!(
                "Task orphaned: queue job expired while status was {old_status}. \
                 Likely caused by worker restart or storage eviction."
            ));
            inner.store_projection(&task).await;
            inner.forget(task_id);
            Ok(task)
        }
        (Some(projection), false) => {
            if !projection.task_status.is_terminal() {
                // Revalidate once: the transient error may have masked a
                // fresh transition.
                if let Ok(JobFetch::Found(record)) = inner.store.fetch_job(task_id).await {
                    if task_status_from_job(record.state) != projection.task_status {
                        return adopt_record(inner, task_id, record).await;
                    }
                }
            }
            Ok(projection.into_task())
        }
        (None, true) => {
            warn!(task_id = %task_id, "No record in store or projection, task is gone");
            inner.forget(task_id);
            Err(DocflowError::task_not_found(task_id))
        }
        (None, false) => {
            // Store and projection both unreachable: answer from the cache
            // so the client can retry, or admit we know nothing.
            inner
                .tracker
                .get(task_id)
                .ok_or_else(|| DocflowError::task_not_found(task_id))
        }
    }
}

/// Adopt an authoritative job record: merge it into the cache (terminal
/// cache entries still win), capture the result key, and write the
/// projection through.
async fn adopt_record(inner: &RqInner, task_id: TaskId, record: JobRecord) -> DocflowResult<Task> {
    if let Some(result_key) = record.result_key.clone() {
        inner.record_result_key(task_id, &result_key).await;
    }
    let task = task_from_record(record);
    let snapshot = inner.tracker.adopt(task);
    inner.store_projection(&snapshot).await;
    Ok(snapshot)
}

/// Build a task snapshot from the store's job record. The job payload is
/// the enqueued task; the record's own fields carry the authoritative
/// lifecycle state.
fn task_from_record(record: JobRecord) -> Task {
    let mut task: Task = match serde_json::from_value(record.payload.clone()) {
        Ok(task) => task,
        Err(err) => {
            warn!(job_id = %record.job_id, error = %err, "Unparseable job payload, reconstructing from record");
            Task::new(
                record.job_id,
                docflow_shared::types::TaskType::Convert,
                Vec::new(),
                serde_json::Value::Null,
                docflow_shared::types::TaskTarget::default(),
            )
        }
    };
    task.task_id = record.job_id;
    task.task_status = task_status_from_job(record.state);
    task.processing_meta = record.processing_meta;
    task.error_message = record.error_message;
    task.started_at = record.started_at.or(task.started_at);
    task.finished_at = record.finished_at.or(task.finished_at);
    task
}
