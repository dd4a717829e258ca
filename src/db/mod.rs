//! Event store backends.
//!
//! A store owns exactly one connection to the `events` table. Each trait
//! method is one transaction: committed on success, rolled back on any
//! error. Callers never hold a store directly; they go through
//! [`crate::queue::QueueAccessLayer`], which serializes access.

pub mod postgres;
pub mod sqlite;

pub use postgres::PgStore;
pub use sqlite::SqliteStore;

use crate::error::{Error, Result};
use crate::model::{ClaimedEvent, Event, EventId, NewEvent, ReclaimReport};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Transaction;

/// The three queue operations plus a read-only lookup.
#[async_trait]
pub trait EventStore: Send {
    /// Mark one unclaimed, unprocessed event as in progress and return it.
    async fn claim(&mut self, at: DateTime<Utc>) -> Result<Option<ClaimedEvent>>;

    /// Set `processed` on `id` if it is not already. Returns whether a row changed.
    async fn complete(&mut self, id: &EventId) -> Result<bool>;

    /// Release claims taken at or before `release_before`, then delete rows
    /// claimed at or before `purge_before`.
    async fn reclaim_stale(
        &mut self,
        release_before: DateTime<Utc>,
        purge_before: DateTime<Utc>,
    ) -> Result<ReclaimReport>;

    async fn fetch(&mut self, id: &EventId) -> Result<Option<Event>>;
}

/// Schema management and producer-side inserts. Not part of the queue protocol.
#[async_trait]
pub trait StoreAdmin: EventStore {
    /// Create the `events` table if it does not exist.
    async fn ensure_schema(&mut self) -> Result<()>;

    async fn insert(&mut self, event: NewEvent) -> Result<EventId>;

    /// Simple health check: run a SELECT 1.
    async fn health_check(&mut self) -> Result<()>;
}

/// Which backend a connection URL points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Postgres,
}

impl Backend {
    pub fn from_url(url: &str) -> Result<Self> {
        if url.starts_with("sqlite:") {
            Ok(Backend::Sqlite)
        } else if url.starts_with("postgres:") || url.starts_with("postgresql:") {
            Ok(Backend::Postgres)
        } else {
            let scheme = url.split(':').next().unwrap_or_default();
            Err(Error::Config(format!(
                "unsupported database scheme '{scheme}' (expected sqlite: or postgres:)"
            )))
        }
    }
}

/// Commit `tx` if `result` is ok, otherwise roll it back and hand the error on.
async fn finish<DB, T>(tx: Transaction<'_, DB>, result: Result<T>) -> Result<T>
where
    DB: sqlx::Database,
{
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::error!(error = %rollback, "rollback failed");
            }
            Err(e)
        }
    }
}

/// Columns returned by a successful claim. `id` is selected as text.
#[derive(sqlx::FromRow)]
struct ClaimedRow {
    id: String,
    idempotency_key: String,
    event_type: String,
    payload: String,
}

impl From<ClaimedRow> for ClaimedEvent {
    fn from(row: ClaimedRow) -> Self {
        Self {
            id: EventId::from(row.id),
            idempotency_key: row.idempotency_key,
            event_type: row.event_type,
            payload: row.payload,
        }
    }
}
