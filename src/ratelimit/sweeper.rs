//! Background eviction of stale windows.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::limiter::RateLimiter;

/// Periodically sweeps a limiter's store until told to stop.
pub struct Sweeper {
    limiter: Arc<RateLimiter>,
    interval: Duration,
    budget: usize,
}

impl Sweeper {
    pub fn new(limiter: Arc<RateLimiter>, interval: Duration, budget: usize) -> Self {
        Self {
            limiter,
            interval: interval.max(Duration::from_millis(1)),
            budget: budget.max(1),
        }
    }

    /// Run one tick: drain stale records in `budget`-sized batches, yielding
    /// to the runtime between batches. Returns the total evicted.
    pub async fn run_once(&self) -> usize {
        let mut total = 0;
        loop {
            let report = self.limiter.sweep(self.budget);
            total += report.evicted;
            if report.evicted < self.budget {
                break;
            }
            tokio::task::yield_now().await;
        }
        total
    }

    /// Spawn the sweep loop. It exits when `shutdown` changes or its sender
    /// is dropped.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval = ?self.interval,
                budget = self.budget,
                "Starting rate limit window sweeper"
            );

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately; nothing is stale yet.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = self.run_once().await;
                        debug!(
                            evicted = evicted,
                            tracked = self.limiter.tracked_keys(),
                            "Sweep tick complete"
                        );
                    }
                    _ = shutdown.changed() => {
                        info!("Stopping rate limit window sweeper");
                        break;
                    }
                }
            }
        })
    }
}
