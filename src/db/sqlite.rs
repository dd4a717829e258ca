//! SQLite backend.
//!
//! Flags are stored as 0/1 integers and timestamps as UTC text in the
//! `datetime('now')` shape with milliseconds appended. Ages are compared with
//! `julianday()`, which reads both forms. WAL mode for concurrent readers.
//!
//! Ids are read back with `CAST(id AS TEXT)` so producer tables keyed by
//! text work as well as our own integer keys.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode};
use sqlx::{ConnectOptions, Connection};

use super::{ClaimedRow, EventStore, StoreAdmin, finish};
use crate::error::{Error, Result};
use crate::model::{ClaimedEvent, Event, EventId, NewEvent, ReclaimReport};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Storage backend. Owns the SQLite connection.
pub struct SqliteStore {
    conn: SqliteConnection,
}

impl SqliteStore {
    /// Open (or create) the database named by a `sqlite:` URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let conn = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .connect()
            .await?;
        Ok(Self::from_connection(conn))
    }

    /// Private in-memory database (for testing).
    pub async fn in_memory() -> Result<Self> {
        let conn = SqliteConnectOptions::from_str("sqlite::memory:")?
            .connect()
            .await?;
        Ok(Self::from_connection(conn))
    }

    /// Wrap an already-open connection whose `events` table exists.
    pub fn from_connection(conn: SqliteConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn claim(&mut self, at: DateTime<Utc>) -> Result<Option<ClaimedEvent>> {
        let mut tx = self.conn.begin().await?;
        let result = claim_on(&mut tx, &format_timestamp(at)).await;
        finish(tx, result).await
    }

    async fn complete(&mut self, id: &EventId) -> Result<bool> {
        let mut tx = self.conn.begin().await?;
        let result = complete_on(&mut tx, id).await;
        finish(tx, result).await
    }

    async fn reclaim_stale(
        &mut self,
        release_before: DateTime<Utc>,
        purge_before: DateTime<Utc>,
    ) -> Result<ReclaimReport> {
        let mut tx = self.conn.begin().await?;
        let result = reclaim_on(
            &mut tx,
            &format_timestamp(release_before),
            &format_timestamp(purge_before),
        )
        .await;
        finish(tx, result).await
    }

    async fn fetch(&mut self, id: &EventId) -> Result<Option<Event>> {
        let row: Option<EventRow> = sqlx::query_as(
            "SELECT CAST(id AS TEXT) AS id, idempotency_key, event_type, payload,
                    processed, in_progress, processing_date
             FROM events WHERE id = ?1",
        )
        .bind(id.as_str())
        .fetch_optional(&mut self.conn)
        .await?;

        row.map(EventRow::try_into_event).transpose()
    }
}

#[async_trait]
impl StoreAdmin for SqliteStore {
    async fn ensure_schema(&mut self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS events (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                idempotency_key TEXT NOT NULL DEFAULT '',
                event_type      TEXT NOT NULL,
                payload         TEXT NOT NULL,
                processed       INTEGER NOT NULL DEFAULT 0,
                in_progress     INTEGER NOT NULL DEFAULT 0,
                processing_date TEXT
            )",
        )
        .execute(&mut self.conn)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_events_claimable ON events (processed, in_progress)",
        )
        .execute(&mut self.conn)
        .await?;
        Ok(())
    }

    async fn insert(&mut self, event: NewEvent) -> Result<EventId> {
        let (id,): (String,) = sqlx::query_as(
            "INSERT INTO events (idempotency_key, event_type, payload, processed, in_progress)
             VALUES (?1, ?2, ?3, 0, 0)
             RETURNING CAST(id AS TEXT)",
        )
        .bind(&event.idempotency_key)
        .bind(&event.event_type)
        .bind(&event.payload)
        .fetch_one(&mut self.conn)
        .await?;
        Ok(EventId::from(id))
    }

    async fn health_check(&mut self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&mut self.conn).await?;
        Ok(())
    }
}

// The subselect and the update are one statement, so SQLite's write lock
// makes the pick-and-mark atomic even across connections.
async fn claim_on(conn: &mut SqliteConnection, at: &str) -> Result<Option<ClaimedEvent>> {
    let row: Option<ClaimedRow> = sqlx::query_as(
        "UPDATE events
         SET in_progress = 1,
             processing_date = ?1
         WHERE id = (
             SELECT id
             FROM events
             WHERE processed = 0 AND in_progress = 0
             LIMIT 1
         )
         RETURNING CAST(id AS TEXT) AS id, idempotency_key, event_type, payload",
    )
    .bind(at)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(ClaimedEvent::from))
}

// A text parameter still matches an INTEGER key: SQLite applies the
// column's numeric affinity to the other operand.
async fn complete_on(conn: &mut SqliteConnection, id: &EventId) -> Result<bool> {
    let rows_affected =
        sqlx::query("UPDATE events SET processed = 1 WHERE id = ?1 AND processed = 0")
            .bind(id.as_str())
            .execute(&mut *conn)
            .await?
            .rows_affected();
    Ok(rows_affected > 0)
}

async fn reclaim_on(
    conn: &mut SqliteConnection,
    release_before: &str,
    purge_before: &str,
) -> Result<ReclaimReport> {
    let released = sqlx::query(
        "UPDATE events
         SET in_progress = 0
         WHERE processed = 0
           AND in_progress = 1
           AND processing_date IS NOT NULL
           AND julianday(processing_date) <= julianday(?1)",
    )
    .bind(release_before)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    let deleted = sqlx::query(
        "DELETE FROM events
         WHERE processing_date IS NOT NULL
           AND julianday(processing_date) <= julianday(?1)",
    )
    .bind(purge_before)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    Ok(ReclaimReport { released, deleted })
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Accepts both `datetime('now')` output and RFC 3339.
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("bad processing_date '{raw}': {e}")))
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    idempotency_key: String,
    event_type: String,
    payload: String,
    processed: bool,
    in_progress: bool,
    processing_date: Option<String>,
}

impl EventRow {
    fn try_into_event(self) -> Result<Event> {
        Ok(Event {
            id: EventId::from(self.id),
            idempotency_key: self.idempotency_key,
            event_type: self.event_type,
            payload: self.payload,
            processed: self.processed,
            in_progress: self.in_progress,
            processing_date: self.processing_date.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}
