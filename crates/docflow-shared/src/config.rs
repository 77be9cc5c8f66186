//! # Configuration
//!
//! Process configuration for the orchestration service, loaded from an
//! optional TOML file (`DOCFLOW_CONFIG_PATH`) with `DOCFLOW_`-prefixed
//! environment overrides layered on top. All durations are plain seconds in
//! the file; engine-level configs convert them to `Duration` at construction.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DocflowError, DocflowResult};

/// Which engine backend the process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// In-process worker pool.
    Local,
    /// Client of the durable key-value job store; workers run out of process.
    Rq,
}

impl Default for EngineKind {
    fn default() -> Self {
        Self::Local
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocflowConfig {
    /// Engine backend selection.
    pub engine: EngineKind,
    /// Bind address for the HTTP surface.
    pub bind_addr: String,
    /// Worker pool size (local engine).
    pub num_workers: usize,
    /// Maximum pending tasks; 0 means unbounded.
    pub queue_max_size: usize,
    /// How long terminal results and their durable projections live.
    pub results_ttl_seconds: u64,
    /// Retention for failed-job diagnostic data; defaults to the results TTL.
    pub failure_ttl_seconds: Option<u64>,
    /// Whether fetching a result schedules its deletion. Defaults on for the
    /// distributed engine, off for the local engine.
    pub single_use_results: Option<bool>,
    /// Delay before deletion after a single-use fetch.
    pub result_removal_delay_seconds: u64,
    /// Poll cadence for the synchronous wait-in-request flow.
    pub sync_poll_interval_seconds: u64,
    /// Bound on the synchronous flow; exceeding it returns `Timeout`.
    pub max_sync_wait_seconds: u64,
    /// Zombie reaper sweep cadence.
    pub sweep_interval_seconds: u64,
    /// Zombie reaper retention for terminal tasks.
    pub max_age_seconds: u64,
    /// Connection url of the job store (distributed engine).
    pub redis_url: String,
    /// Key prefix for all job-store entries.
    pub key_prefix: String,
    /// Root directory for per-task scratch space.
    pub scratch_root: Option<PathBuf>,
    /// Run embedded workers inside the service process (distributed engine
    /// development mode).
    pub dev_mode: bool,
    /// Default per-task processing deadline when the submission's options do
    /// not carry one.
    pub default_document_timeout_seconds: u64,
}

impl Default for DocflowConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::Local,
            bind_addr: "0.0.0.0:5001".to_string(),
            num_workers: 2,
            queue_max_size: 0,
            results_ttl_seconds: 3_600 * 4,
            failure_ttl_seconds: None,
            single_use_results: None,
            result_removal_delay_seconds: 10,
            sync_poll_interval_seconds: 2,
            max_sync_wait_seconds: 120,
            sweep_interval_seconds: 300,
            max_age_seconds: 3_600,
            redis_url: "redis://localhost:6379/".to_string(),
            key_prefix: "docflow:tasks:".to_string(),
            scratch_root: None,
            dev_mode: false,
            default_document_timeout_seconds: 3_600 * 4,
        }
    }
}

impl DocflowConfig {
    /// Load configuration from `DOCFLOW_CONFIG_PATH` (if set) and the
    /// environment. Environment keys use the `DOCFLOW_` prefix, e.g.
    /// `DOCFLOW_ENGINE=rq`, `DOCFLOW_NUM_WORKERS=4`.
    pub fn load() -> DocflowResult<Self> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var("DOCFLOW_CONFIG_PATH") {
            builder = builder.add_source(config::File::with_name(&path));
        }
        builder = builder.add_source(config::Environment::with_prefix("DOCFLOW").try_parsing(true));

        let raw = builder
            .build()
            .map_err(|e| DocflowError::invalid_request(format!("configuration error: {e}")))?;
        raw.try_deserialize()
            .map_err(|e| DocflowError::invalid_request(format!("configuration error: {e}")))
    }

    pub fn results_ttl(&self) -> Duration {
        Duration::from_secs(self.results_ttl_seconds)
    }

    /// Failure TTL, falling back to the results TTL so that job records,
    /// projections, and results all expire together by default.
    pub fn failure_ttl(&self) -> Duration {
        Duration::from_secs(self.failure_ttl_seconds.unwrap_or(self.results_ttl_seconds))
    }

    /// Single-use results default: on for the distributed engine, off for
    /// the local engine.
    pub fn single_use_results(&self) -> bool {
        self.single_use_results
            .unwrap_or(self.engine == EngineKind::Rq)
    }

    pub fn result_removal_delay(&self) -> Duration {
        Duration::from_secs(self.result_removal_delay_seconds)
    }

    pub fn sync_poll_interval(&self) -> Duration {
        Duration::from_secs(self.sync_poll_interval_seconds)
    }

    pub fn max_sync_wait(&self) -> Duration {
        Duration::from_secs(self.max_sync_wait_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_seconds)
    }

    pub fn default_document_timeout(&self) -> Duration {
        Duration::from_secs(self.default_document_timeout_seconds)
    }
}
