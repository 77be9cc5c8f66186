//! # Durable Job Store
//!
//! Client for the external queue service the distributed engine rides on: a
//! key-value store holding job records, a FIFO queue of pending job ids,
//! worker heartbeats, and TTL-bounded values (projections and results).
//!
//! Two providers behind one enum, dispatched without trait objects:
//! [`RedisJobStore`] for production and [`InMemoryJobStore`] for tests and
//! single-process development. The orchestrator side uses the client
//! operations; out-of-process workers use the worker-side operations
//! (`claim_next_job`, `mark_job_started`, `complete_job`, `fail_job`,
//! `register_worker`).

pub mod in_memory;
pub mod redis;
pub mod types;

use std::time::Duration;

pub use self::in_memory::InMemoryJobStore;
pub use self::redis::RedisJobStore;
pub use self::types::{JobFetch, JobRecord, JobState, JobStoreError, NewJob};

use crate::types::{ProcessingMeta, TaskId};

/// Provider-dispatching job store handle. Cheap to clone.
#[derive(Debug, Clone)]
pub enum JobStore {
    Redis(RedisJobStore),
    InMemory(InMemoryJobStore),
}

impl JobStore {
    /// Connect the Redis provider.
    pub async fn connect_redis(url: &str, prefix: &str) -> Result<Self, JobStoreError> {
        Ok(Self::Redis(RedisJobStore::connect(url, prefix).await?))
    }

    /// Fresh in-memory provider.
    pub fn new_in_memory() -> Self {
        Self::InMemory(InMemoryJobStore::new())
    }

    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::Redis(_) => "redis",
            Self::InMemory(_) => "in_memory",
        }
    }

    pub async fn ping(&self) -> Result<(), JobStoreError> {
        match self {
            Self::Redis(store) => store.ping().await,
            Self::InMemory(store) => store.ping(),
        }
    }

    /// Admit a new job: write the record and append it to the queue.
    pub async fn enqueue_job(&self, job: NewJob) -> Result<(), JobStoreError> {
        match self {
            Self::Redis(store) => store.enqueue_job(job).await,
            Self::InMemory(store) => store.enqueue_job(job),
        }
    }

    /// Look the job up. `Gone` is the definitive "no such job" answer;
    /// transport problems come back as errors and must be treated as
    /// transient by the caller.
    pub async fn fetch_job(&self, job_id: TaskId) -> Result<JobFetch, JobStoreError> {
        match self {
            Self::Redis(store) => store.fetch_job(job_id).await,
            Self::InMemory(store) => store.fetch_job(job_id),
        }
    }

    /// 0-based position among queued jobs; `None` once claimed or unknown.
    pub async fn job_position(&self, job_id: TaskId) -> Result<Option<usize>, JobStoreError> {
        match self {
            Self::Redis(store) => store.job_position(job_id).await,
            Self::InMemory(store) => store.job_position(job_id),
        }
    }

    pub async fn queue_depth(&self) -> Result<usize, JobStoreError> {
        match self {
            Self::Redis(store) => store.queue_depth().await,
            Self::InMemory(store) => store.queue_depth(),
        }
    }

    /// Remove the job record and any queue entry. Idempotent.
    pub async fn delete_job(&self, job_id: TaskId) -> Result<(), JobStoreError> {
        match self {
            Self::Redis(store) => store.delete_job(job_id).await,
            Self::InMemory(store) => store.delete_job(job_id),
        }
    }

    /// Store a value under a caller-composed key with the given TTL
    /// (zero = no expiry).
    pub async fn put_value(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), JobStoreError> {
        match self {
            Self::Redis(store) => store.put_value(key, value, ttl).await,
            Self::InMemory(store) => store.put_value(key, value, ttl),
        }
    }

    pub async fn get_value(&self, key: &str) -> Result<Option<Vec<u8>>, JobStoreError> {
        match self {
            Self::Redis(store) => store.get_value(key).await,
            Self::InMemory(store) => store.get_value(key),
        }
    }

    pub async fn delete_value(&self, key: &str) -> Result<(), JobStoreError> {
        match self {
            Self::Redis(store) => store.delete_value(key).await,
            Self::InMemory(store) => store.delete_value(key),
        }
    }

    /// Record a worker heartbeat that expires after `ttl`.
    pub async fn register_worker(&self, name: &str, ttl: Duration) -> Result<(), JobStoreError> {
        match self {
            Self::Redis(store) => store.register_worker(name, ttl).await,
            Self::InMemory(store) => store.register_worker(name, ttl),
        }
    }

    /// Number of workers with a live heartbeat.
    pub async fn worker_count(&self) -> Result<usize, JobStoreError> {
        match self {
            Self::Redis(store) => store.worker_count().await,
            Self::InMemory(store) => store.worker_count(),
        }
    }

    // Worker-side contract.

    /// Pop the next queued job, skipping entries whose record has been
    /// deleted. Returns `None` when the queue is empty.
    pub async fn claim_next_job(&self) -> Result<Option<JobRecord>, JobStoreError> {
        match self {
            Self::Redis(store) => store.claim_next_job().await,
            Self::InMemory(store) => store.claim_next_job(),
        }
    }

    pub async fn mark_job_started(&self, job_id: TaskId) -> Result<(), JobStoreError> {
        match self {
            Self::Redis(store) => store.mark_job_started(job_id).await,
            Self::InMemory(store) => store.mark_job_started(job_id),
        }
    }

    /// Persist the result under `result_key` (with the job's result TTL),
    /// then mark the job finished. The record itself starts expiring with
    /// the same TTL so record, projection, and result leave together.
    pub async fn complete_job(
        &self,
        job_id: TaskId,
        result_key: &str,
        result: Vec<u8>,
        meta: ProcessingMeta,
    ) -> Result<(), JobStoreError> {
        match self {
            Self::Redis(store) => store.complete_job(job_id, result_key, result, meta).await,
            Self::InMemory(store) => store.complete_job(job_id, result_key, result, meta),
        }
    }

    /// Mark the job failed with a diagnostic message, retained for the
    /// job's failure TTL.
    pub async fn fail_job(
        &self,
        job_id: TaskId,
        error: &str,
        meta: ProcessingMeta,
    ) -> Result<(), JobStoreError> {
        match self {
            Self::Redis(store) => store.fail_job(job_id, error, meta).await,
            Self::InMemory(store) => store.fail_job(job_id, error, meta),
        }
    }
}
