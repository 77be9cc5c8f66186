//! In-memory job store provider.
//!
//! Single-process stand-in for the Redis backend with the same contract,
//! including TTL expiry (evaluated lazily on access) and an `offline` switch
//! that makes every operation fail with a connection error. Used by tests
//! and by development deployments that do not run a real store.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::types::{ProcessingMeta, TaskId};

use super::types::{JobFetch, JobRecord, JobStoreError, NewJob};
use super::JobState;

#[derive(Debug)]
struct StoredJob {
    record: JobRecord,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    jobs: HashMap<TaskId, StoredJob>,
    queue: VecDeque<TaskId>,
    values: HashMap<String, (Vec<u8>, Option<Instant>)>,
    workers: HashMap<String, Instant>,
}

/// In-memory implementation of the job store contract.
#[derive(Debug, Clone, Default)]
pub struct InMemoryJobStore {
    state: Arc<Mutex<InMemoryState>>,
    offline: Arc<AtomicBool>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing the store: every subsequent operation fails with a
    /// connection error until restored.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), JobStoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(JobStoreError::connection("in-memory store is offline"))
        } else {
            Ok(())
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InMemoryState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn ping(&self) -> Result<(), JobStoreError> {
        self.check_online()
    }

    pub fn enqueue_job(&self, job: NewJob) -> Result<(), JobStoreError> {
        self.check_online()?;
        let mut state = self.lock();
        let record = job.into_record();
        let job_id = record.job_id;
        state.jobs.insert(
            job_id,
            StoredJob {
                record,
                expires_at: None,
            },
        );
        state.queue.push_back(job_id);
        Ok(())
    }

    pub fn fetch_job(&self, job_id: TaskId) -> Result<JobFetch, JobStoreError> {
        self.check_online()?;
        let mut state = self.lock();
        match state.jobs.get(&job_id) {
            Some(stored) if !expired(stored.expires_at) => Ok(JobFetch::Found(stored.record.clone())),
            Some(_) => {
                state.jobs.remove(&job_id);
                Ok(JobFetch::Gone)
            }
            None => Ok(JobFetch::Gone),
        }
    }

    pub fn job_position(&self, job_id: TaskId) -> Result<Option<usize>, JobStoreError> {
        self.check_online()?;
        let state = self.lock();
        Ok(state.queue.iter().position(|id| *id == job_id))
    }

    pub fn queue_depth(&self) -> Result<usize, JobStoreError> {
        self.check_online()?;
        Ok(self.lock().queue.len())
    }

    pub fn delete_job(&self, job_id: TaskId) -> Result<(), JobStoreError> {
        self.check_online()?;
        let mut state = self.lock();
        state.jobs.remove(&job_id);
        state.queue.retain(|id| *id != job_id);
        Ok(())
    }

    pub fn put_value(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), JobStoreError> {
        self.check_online()?;
        let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        self.lock().values.insert(key.to_string(), (value, expires_at));
        Ok(())
    }

    pub fn get_value(&self, key: &str) -> Result<Option<Vec<u8>>, JobStoreError> {
        self.check_online()?;
        let mut state = self.lock();
        match state.values.get(key) {
            Some((value, expires_at)) if !expired(*expires_at) => Ok(Some(value.clone())),
            Some(_) => {
                state.values.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub fn delete_value(&self, key: &str) -> Result<(), JobStoreError> {
        self.check_online()?;
        self.lock().values.remove(key);
        Ok(())
    }

    pub fn register_worker(&self, name: &str, ttl: Duration) -> Result<(), JobStoreError> {
        self.check_online()?;
        self.lock()
            .workers
            .insert(name.to_string(), Instant::now() + ttl);
        Ok(())
    }

    pub fn worker_count(&self) -> Result<usize, JobStoreError> {
        self.check_online()?;
        let mut state = self.lock();
        let now = Instant::now();
        state.workers.retain(|_, expires_at| *expires_at > now);
        Ok(state.workers.len())
    }

    // Worker-side contract.

    pub fn claim_next_job(&self) -> Result<Option<JobRecord>, JobStoreError> {
        self.check_online()?;
        let mut state = self.lock();
        while let Some(job_id) = state.queue.pop_front() {
            if let Some(stored) = state.jobs.get(&job_id) {
                if !expired(stored.expires_at) {
                    return Ok(Some(stored.record.clone()));
                }
            }
        }
        Ok(None)
    }

    pub fn mark_job_started(&self, job_id: TaskId) -> Result<(), JobStoreError> {
        self.check_online()?;
        let mut state = self.lock();
        let stored = state
            .jobs
            .get_mut(&job_id)
            .ok_or(JobStoreError::NoSuchJob(job_id))?;
        stored.record.state = JobState::Started;
        stored.record.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete_job(
        &self,
        job_id: TaskId,
        result_key: &str,
        result: Vec<u8>,
        meta: ProcessingMeta,
    ) -> Result<(), JobStoreError> {
        self.check_online()?;
        let mut state = self.lock();
        let stored = state
            .jobs
            .get_mut(&job_id)
            .ok_or(JobStoreError::NoSuchJob(job_id))?;
        let ttl = Duration::from_secs(stored.record.result_ttl_seconds);
        stored.record.state = JobState::Finished;
        stored.record.result_key = Some(result_key.to_string());
        stored.record.processing_meta = meta;
        stored.record.finished_at = Some(Utc::now());
        stored.expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);

        let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        state
            .values
            .insert(result_key.to_string(), (result, expires_at));
        Ok(())
    }

    pub fn fail_job(
        &self,
        job_id: TaskId,
        error: &str,
        meta: ProcessingMeta,
    ) -> Result<(), JobStoreError> {
        self.check_online()?;
        let mut state = self.lock();
        let stored = state
            .jobs
            .get_mut(&job_id)
            .ok_or(JobStoreError::NoSuchJob(job_id))?;
        let ttl = Duration::from_secs(stored.record.failure_ttl_seconds);
        stored.record.state = JobState::Failed;
        stored.record.error_message = Some(error.to_string());
        stored.record.processing_meta = meta;
        stored.record.finished_at = Some(Utc::now());
        stored.expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        Ok(())
    }
}

fn expired(expires_at: Option<Instant>) -> bool {
    expires_at.is_some_and(|at| at <= Instant::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_job(job_id: TaskId) -> NewJob {
        NewJob {
            job_id,
            payload: serde_json::json!({"task_id": job_id}),
            timeout: Duration::from_secs(60),
            result_ttl: Duration::from_secs(60),
            failure_ttl: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_enqueue_fetch_roundtrip() {
        let store = InMemoryJobStore::new();
        let job_id = TaskId::new();
        store.enqueue_job(new_job(job_id)).unwrap();

        match store.fetch_job(job_id).unwrap() {
            JobFetch::Found(record) => {
                assert_eq!(record.job_id, job_id);
                assert_eq!(record.state, JobState::Queued);
            }
            JobFetch::Gone => panic!("job should exist"),
        }
        assert_eq!(store.queue_depth().unwrap(), 1);
        assert_eq!(store.job_position(job_id).unwrap(), Some(0));
    }

    #[test]
    fn test_fetch_missing_is_gone_not_error() {
        let store = InMemoryJobStore::new();
        assert!(matches!(
            store.fetch_job(TaskId::new()).unwrap(),
            JobFetch::Gone
        ));
    }

    #[test]
    fn test_fifo_positions() {
        let store = InMemoryJobStore::new();
        let first = TaskId::new();
        let second = TaskId::new();
        store.enqueue_job(new_job(first)).unwrap();
        store.enqueue_job(new_job(second)).unwrap();

        assert_eq!(store.job_position(first).unwrap(), Some(0));
        assert_eq!(store.job_position(second).unwrap(), Some(1));

        let claimed = store.claim_next_job().unwrap().unwrap();
        assert_eq!(claimed.job_id, first);
        assert_eq!(store.job_position(second).unwrap(), Some(0));
    }

    #[test]
    fn test_complete_job_stores_result_and_reexpires() {
        let store = InMemoryJobStore::new();
        let job_id = TaskId::new();
        store.enqueue_job(new_job(job_id)).unwrap();
        store.claim_next_job().unwrap();
        store.mark_job_started(job_id).unwrap();

        let meta = ProcessingMeta {
            num_docs: 1,
            num_processed: 1,
            num_succeeded: 1,
            num_failed: 0,
        };
        store
            .complete_job(job_id, "docflow:result:x", b"{}".to_vec(), meta)
            .unwrap();

        match store.fetch_job(job_id).unwrap() {
            JobFetch::Found(record) => {
                assert_eq!(record.state, JobState::Finished);
                assert_eq!(record.result_key.as_deref(), Some("docflow:result:x"));
                assert_eq!(record.processing_meta, meta);
            }
            JobFetch::Gone => panic!("finished job should persist until TTL"),
        }
        assert_eq!(store.get_value("docflow:result:x").unwrap(), Some(b"{}".to_vec()));
    }

    #[test]
    fn test_value_ttl_expires() {
        let store = InMemoryJobStore::new();
        store
            .put_value("short", b"x".to_vec(), Duration::from_millis(1))
            .unwrap();
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(store.get_value("short").unwrap(), None);
    }

    #[test]
    fn test_offline_switch() {
        let store = InMemoryJobStore::new();
        store.set_offline(true);
        assert!(matches!(
            store.fetch_job(TaskId::new()),
            Err(JobStoreError::Connection(_))
        ));
        store.set_offline(false);
        assert!(store.ping().is_ok());
    }

    #[test]
    fn test_worker_heartbeats_expire() {
        let store = InMemoryJobStore::new();
        store
            .register_worker("w0", Duration::from_millis(1))
            .unwrap();
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(store.worker_count().unwrap(), 0);

        store.register_worker("w0", Duration::from_secs(30)).unwrap();
        assert_eq!(store.worker_count().unwrap(), 1);
    }
}
