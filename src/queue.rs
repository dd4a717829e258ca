//! Queue access layer.
//!
//! Owns the store handle behind one async mutex and exposes the queue
//! protocol as single operations. The lock is held for exactly one store
//! call, never across calls, so a worker's handler always runs unlocked.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use opentelemetry::KeyValue;
use tokio::sync::Mutex;
use tracing::debug;

use crate::db::EventStore;
use crate::error::{Error, Result};
use crate::model::{Claim, Event, EventId, ReclaimReport};
use crate::telemetry::metrics;

/// Age limits applied by [`QueueAccessLayer::reclaim_stale`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleThresholds {
    release_after: TimeDelta,
    retain_for: TimeDelta,
}

impl StaleThresholds {
    /// Claims older than `release_after` go back to the pool; rows claimed
    /// longer ago than `retain_for` are deleted. `retain_for` must not be
    /// shorter than `release_after`.
    pub fn new(release_after: Duration, retain_for: Duration) -> Result<Self> {
        if retain_for < release_after {
            return Err(Error::Config(format!(
                "retention ({retain_for:?}) must be at least \
                 the release threshold ({release_after:?})"
            )));
        }
        let to_delta = |d: Duration| {
            TimeDelta::from_std(d).map_err(|e| Error::Config(format!("threshold {d:?}: {e}")))
        };
        Ok(Self {
            release_after: to_delta(release_after)?,
            retain_for: to_delta(retain_for)?,
        })
    }

    pub fn release_after(&self) -> TimeDelta {
        self.release_after
    }

    pub fn retain_for(&self) -> TimeDelta {
        self.retain_for
    }
}

impl Default for StaleThresholds {
    fn default() -> Self {
        Self {
            release_after: TimeDelta::minutes(2),
            retain_for: TimeDelta::minutes(3),
        }
    }
}

/// Exclusive owner of the event store.
pub struct QueueAccessLayer<S> {
    store: Mutex<S>,
    thresholds: StaleThresholds,
}

impl<S: EventStore> QueueAccessLayer<S> {
    pub fn new(store: S, thresholds: StaleThresholds) -> Self {
        Self {
            store: Mutex::new(store),
            thresholds,
        }
    }

    pub fn thresholds(&self) -> StaleThresholds {
        self.thresholds
    }

    /// Claim one eligible event, stamping it with the current time.
    pub async fn claim(&self) -> Result<Claim> {
        self.claim_at(Utc::now()).await
    }

    pub async fn claim_at(&self, now: DateTime<Utc>) -> Result<Claim> {
        let claimed = {
            let mut store = self.store.lock().await;
            store.claim(now).await
        };
        let claimed = record("claim", claimed)?;

        match claimed {
            Some(event) => {
                debug!(id = %event.id, event_type = %event.event_type, "claimed event");
                Ok(Claim::Event(event))
            }
            None => Ok(Claim::Empty),
        }
    }

    /// Mark `id` processed. Completing a completed or unknown id is a no-op.
    pub async fn complete(&self, id: &EventId) -> Result<()> {
        let changed = {
            let mut store = self.store.lock().await;
            store.complete(id).await
        };
        if !record("complete", changed)? {
            debug!(%id, "complete was a no-op");
        }
        Ok(())
    }

    /// Release stale claims and purge expired rows, measured from now.
    pub async fn reclaim_stale(&self) -> Result<ReclaimReport> {
        self.reclaim_stale_at(Utc::now()).await
    }

    pub async fn reclaim_stale_at(&self, now: DateTime<Utc>) -> Result<ReclaimReport> {
        let release_before = now - self.thresholds.release_after;
        let purge_before = now - self.thresholds.retain_for;

        let report = {
            let mut store = self.store.lock().await;
            store.reclaim_stale(release_before, purge_before).await
        };
        let report = record("reclaim_stale", report)?;

        if report.released > 0 {
            metrics::stale_events().add(report.released, &[KeyValue::new("action", "released")]);
        }
        if report.deleted > 0 {
            metrics::stale_events().add(report.deleted, &[KeyValue::new("action", "deleted")]);
        }
        Ok(report)
    }

    /// Read-only lookup, for inspection.
    pub async fn fetch(&self, id: &EventId) -> Result<Option<Event>> {
        let mut store = self.store.lock().await;
        store.fetch(id).await
    }

    /// Give the store back once no tasks share the layer any more.
    pub fn into_inner(self) -> S {
        self.store.into_inner()
    }
}

fn record<T>(operation: &'static str, result: Result<T>) -> Result<T> {
    let outcome = if result.is_ok() { "ok" } else { "error" };
    metrics::queue_operations().add(
        1,
        &[
            KeyValue::new("operation", operation),
            KeyValue::new("result", outcome),
        ],
    );
    result
}
