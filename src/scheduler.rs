//! Periodic ingestion for the long running `krill run` service.

use std::future::Future;

use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

use crate::error::Result;

/// Runs a task on a fixed interval until shutdown is signalled.
pub struct Scheduler {
    every: Duration,
    shutdown: watch::Receiver<bool>,
    stop_on_error: bool,
}

impl Scheduler {
    pub fn new(every: Duration, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            every,
            shutdown,
            stop_on_error: false,
        }
    }

    pub fn from_minutes(minutes: u64, shutdown: watch::Receiver<bool>) -> Self {
        Self::new(Duration::from_secs(minutes * 60), shutdown)
    }

    pub fn stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }

    /// Runs `task` immediately and then once per interval.
    ///
    /// Returns the number of completed runs. A failed run is logged; with
    /// `stop_on_error` it also ends the loop and its error is returned.
    pub async fn run<F, Fut>(mut self, mut task: F) -> Result<u64>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        info!("Scheduler started (every {} seconds)", self.every.as_secs());

        let mut ticker = interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let stop_on_error = self.stop_on_error;
        let mut runs = 0;

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    runs += 1;
                    if let Err(e) = task().await {
                        error!("Scheduled run {} failed: {}", runs, e);
                        if stop_on_error {
                            return Err(e);
                        }
                    }
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Scheduler stopped after {} runs", runs);
        Ok(runs)
    }
}
