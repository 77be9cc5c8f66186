//! # Retry Policy
//!
//! Bounded exponential backoff for operations that cross the process
//! boundary (job store queries, projection reads/writes). Defaults: three
//! attempts at 100 ms / 400 ms / 1600 ms. Callers map exhaustion to
//! `UpstreamUnavailable`.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            multiplier: 4,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries, for tests and hot paths that handle
    /// fallback themselves.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            multiplier: 1,
        }
    }

    /// Run `op` until it succeeds or the attempt budget is spent, sleeping
    /// between attempts. The final error is returned unchanged.
    pub async fn run<T, E, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut delay = self.base_delay;
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= self.max_attempts => return Err(err),
                Err(err) => {
                    warn!(
                        op = %op_name,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= self.multiplier;
                    attempt += 1;
                }
            }
        }
    }
}
