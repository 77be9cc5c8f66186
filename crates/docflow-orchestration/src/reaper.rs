//! # Zombie Reaper
//!
//! Background sweeper that evicts stale terminal tasks from in-memory
//! tracking. Belt-and-braces cleanup orthogonal to reconciliation: it never
//! reclassifies non-terminal tasks and never touches the durable projection.

use std::time::Duration;

use tracing::info;

/// Reaper cadence and retention.
#[derive(Debug, Clone, Copy)]
pub struct ReaperConfig {
    /// Time between sweeps.
    pub sweep_interval: Duration,
    /// Terminal tasks older than this are removed.
    pub max_age: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(300),
            max_age: Duration::from_secs(3_600),
        }
    }
}

/// Run the sweep loop forever. `sweep` performs one pass and returns how
/// many tasks it removed.
pub async fn run<F>(config: ReaperConfig, sweep: F)
where
    F: Fn() -> usize + Send + 'static,
{
    let mut ticker = tokio::time::interval(config.sweep_interval);
    // The first tick completes immediately; skip it so the initial sweep
    // happens one full interval after startup.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let removed = sweep();
        if removed > 0 {
            info!(removed, "Reaped stale terminal tasks from tracking");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_sweeps_on_interval() {
        let sweeps = Arc::new(AtomicUsize::new(0));
        let counter = sweeps.clone();
        let config = ReaperConfig {
            sweep_interval: Duration::from_secs(300),
            max_age: Duration::from_secs(3_600),
        };
        let handle = tokio::spawn(run(config, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            0
        }));

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(sweeps.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(sweeps.load(Ordering::SeqCst), 2);

        handle.abort();
    }
}
