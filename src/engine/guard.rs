//! Stale guard: periodic release of abandoned claims and retention purge.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use super::wait_or_shutdown;
use crate::db::EventStore;
use crate::model::ReclaimReport;
use crate::queue::QueueAccessLayer;

pub struct StaleGuard<S> {
    queue: Arc<QueueAccessLayer<S>>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl<S: EventStore + 'static> StaleGuard<S> {
    pub fn new(
        queue: Arc<QueueAccessLayer<S>>,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue,
            interval,
            shutdown,
        }
    }

    /// Tick immediately, then once per interval, until shutdown.
    pub async fn run(mut self) {
        let thresholds = self.queue.thresholds();
        info!(
            interval_s = self.interval.as_secs_f64(),
            release_after_s = thresholds.release_after().num_seconds(),
            retain_for_s = thresholds.retain_for().num_seconds(),
            "stale guard started"
        );

        while !*self.shutdown.borrow() {
            self.tick().await;
            if wait_or_shutdown(&mut self.shutdown, self.interval).await {
                break;
            }
        }

        info!("stale guard stopped");
    }

    /// One maintenance pass. Failures are logged, never returned.
    pub async fn tick(&self) -> Option<ReclaimReport> {
        match self.queue.reclaim_stale().await {
            Ok(report) => {
                if report.released > 0 {
                    warn!(
                        released = report.released,
                        "released stale events (in_progress cleared)"
                    );
                }
                if report.deleted > 0 {
                    warn!(deleted = report.deleted, "deleted events past retention");
                }
                Some(report)
            }
            Err(e) => {
                error!(error = %e, "stale guard tick failed");
                None
            }
        }
    }
}
