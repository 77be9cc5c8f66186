//! Redis job store provider.
//!
//! Key layout, under the configured prefix:
//!
//! ```text
//! {prefix}job:{task_id}   JSON job record; expires with result/failure TTL
//!                         once terminal
//! {prefix}queue           pending job ids, FIFO list
//! {prefix}workers         worker heartbeats, sorted set scored by expiry
//! {prefix}{task_id}:*     caller-managed values (projections, result keys,
//!                         result payloads), written via put_value
//! ```
//!
//! Every operation runs through a [`ConnectionManager`], which reconnects
//! transparently; errors that survive it surface as
//! [`JobStoreError::Connection`] and are treated as transient by callers.

use std::time::Duration;

use chrono::Utc;
use redis::aio::ConnectionManager;
use tracing::debug;

use crate::types::{ProcessingMeta, TaskId};

use super::types::{JobFetch, JobRecord, JobStoreError, NewJob};
use super::JobState;

/// Redis implementation of the job store contract.
#[derive(Clone)]
pub struct RedisJobStore {
    manager: ConnectionManager,
    prefix: String,
}

impl std::fmt::Debug for RedisJobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisJobStore")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl RedisJobStore {
    /// Connect to Redis at `url`. The prefix namespaces every key this store
    /// touches.
    pub async fn connect(url: &str, prefix: &str) -> Result<Self, JobStoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| JobStoreError::connection(format!("invalid redis url: {e}")))?;
        let manager = client.get_connection_manager().await?;
        debug!(prefix = %prefix, "Connected to redis job store");
        Ok(Self {
            manager,
            prefix: prefix.to_string(),
        })
    }

    fn job_key(&self, job_id: TaskId) -> String {
        format!("{}job:{}", self.prefix, job_id)
    }

    fn queue_key(&self) -> String {
        format!("{}queue", self.prefix)
    }

    fn workers_key(&self) -> String {
        format!("{}workers", self.prefix)
    }

    async fn read_record(&self, job_id: TaskId) -> Result<Option<JobRecord>, JobStoreError> {
        let mut conn = self.manager.clone();
        let raw: Option<Vec<u8>> = redis::cmd("GET")
            .arg(self.job_key(job_id))
            .query_async(&mut conn)
            .await?;
        match raw {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Write a record back, applying `ttl` when given (terminal records).
    async fn write_record(
        &self,
        record: &JobRecord,
        ttl: Option<Duration>,
    ) -> Result<(), JobStoreError> {
        let mut conn = self.manager.clone();
        let bytes = serde_json::to_vec(record)?;
        match ttl.filter(|t| !t.is_zero()) {
            Some(ttl) => {
                let _: () = redis::cmd("SET")
                    .arg(self.job_key(record.job_id))
                    .arg(bytes)
                    .arg("EX")
                    .arg(ttl.as_secs().max(1))
                    .query_async(&mut conn)
                    .await?;
            }
            None => {
                let _: () = redis::cmd("SET")
                    .arg(self.job_key(record.job_id))
                    .arg(bytes)
                    .query_async(&mut conn)
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn ping(&self) -> Result<(), JobStoreError> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    pub async fn enqueue_job(&self, job: NewJob) -> Result<(), JobStoreError> {
        let record = job.into_record();
        self.write_record(&record, None).await?;
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("RPUSH")
            .arg(self.queue_key())
            .arg(record.job_id.to_string())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn fetch_job(&self, job_id: TaskId) -> Result<JobFetch, JobStoreError> {
        match self.read_record(job_id).await? {
            Some(record) => Ok(JobFetch::Found(record)),
            None => Ok(JobFetch::Gone),
        }
    }

    pub async fn job_position(&self, job_id: TaskId) -> Result<Option<usize>, JobStoreError> {
        let mut conn = self.manager.clone();
        let pos: Option<i64> = redis::cmd("LPOS")
            .arg(self.queue_key())
            .arg(job_id.to_string())
            .query_async(&mut conn)
            .await?;
        Ok(pos.map(|p| p as usize))
    }

    pub async fn queue_depth(&self) -> Result<usize, JobStoreError> {
        let mut conn = self.manager.clone();
        let depth: i64 = redis::cmd("LLEN")
            .arg(self.queue_key())
            .query_async(&mut conn)
            .await?;
        Ok(depth as usize)
    }

    pub async fn delete_job(&self, job_id: TaskId) -> Result<(), JobStoreError> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("LREM")
            .arg(self.queue_key())
            .arg(0)
            .arg(job_id.to_string())
            .query_async(&mut conn)
            .await?;
        let _: () = redis::cmd("DEL")
            .arg(self.job_key(job_id))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn put_value(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), JobStoreError> {
        let mut conn = self.manager.clone();
        if ttl.is_zero() {
            let _: () = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .query_async(&mut conn)
                .await?;
        } else {
            let _: () = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(ttl.as_secs().max(1))
                .query_async(&mut conn)
                .await?;
        }
        Ok(())
    }

    pub async fn get_value(&self, key: &str) -> Result<Option<Vec<u8>>, JobStoreError> {
        let mut conn = self.manager.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    pub async fn delete_value(&self, key: &str) -> Result<(), JobStoreError> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }

    pub async fn register_worker(&self, name: &str, ttl: Duration) -> Result<(), JobStoreError> {
        let mut conn = self.manager.clone();
        let expires_at = Utc::now().timestamp() + ttl.as_secs() as i64;
        let _: () = redis::cmd("ZADD")
            .arg(self.workers_key())
            .arg(expires_at)
            .arg(name)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn worker_count(&self) -> Result<usize, JobStoreError> {
        let mut conn = self.manager.clone();
        let now = Utc::now().timestamp();
        // Drop expired heartbeats, then count the live ones.
        let _: () = redis::cmd("ZREMRANGEBYSCORE")
            .arg(self.workers_key())
            .arg("-inf")
            .arg(now)
            .query_async(&mut conn)
            .await?;
        let count: i64 = redis::cmd("ZCARD")
            .arg(self.workers_key())
            .query_async(&mut conn)
            .await?;
        Ok(count as usize)
    }

    // Worker-side contract.

    pub async fn claim_next_job(&self) -> Result<Option<JobRecord>, JobStoreError> {
        let mut conn = self.manager.clone();
        loop {
            let job_id: Option<String> = redis::cmd("LPOP")
                .arg(self.queue_key())
                .query_async(&mut conn)
                .await?;
            let Some(job_id) = job_id else {
                return Ok(None);
            };
            let job_id: TaskId = job_id
                .parse()
                .map_err(|_| JobStoreError::serialization(format!("bad job id in queue: {job_id}")))?;
            // The record may have been deleted while queued; skip to the next.
            if let Some(record) = self.read_record(job_id).await? {
                return Ok(Some(record));
            }
        }
    }

    pub async fn mark_job_started(&self, job_id: TaskId) -> Result<(), JobStoreError> {
        let mut record = self
            .read_record(job_id)
            .await?
            .ok_or(JobStoreError::NoSuchJob(job_id))?;
        record.state = JobState::Started;
        record.started_at = Some(Utc::now());
        self.write_record(&record, None).await
    }

    pub async fn complete_job(
        &self,
        job_id: TaskId,
        result_key: &str,
        result: Vec<u8>,
        meta: ProcessingMeta,
    ) -> Result<(), JobStoreError> {
        let mut record = self
            .read_record(job_id)
            .await?
            .ok_or(JobStoreError::NoSuchJob(job_id))?;
        let ttl = Duration::from_secs(record.result_ttl_seconds);
        self.put_value(result_key, result, ttl).await?;
        record.state = JobState::Finished;
        record.result_key = Some(result_key.to_string());
        record.processing_meta = meta;
        record.finished_at = Some(Utc::now());
        self.write_record(&record, Some(ttl)).await
    }

    pub async fn fail_job(
        &self,
        job_id: TaskId,
        error: &str,
        meta: ProcessingMeta,
    ) -> Result<(), JobStoreError> {
        let mut record = self
            .read_record(job_id)
            .await?
            .ok_or(JobStoreError::NoSuchJob(job_id))?;
        let ttl = Duration::from_secs(record.failure_ttl_seconds);
        record.state = JobState::Failed;
        record.error_message = Some(error.to_string());
        record.processing_meta = meta;
        record.finished_at = Some(Utc::now());
        self.write_record(&record, Some(ttl)).await
    }
}
