//! PostgreSQL backend.
//!
//! Claims lock the candidate row with `FOR UPDATE SKIP LOCKED`, so the
//! operation stays atomic even if several connections claim at once.
//! Ids are compared and returned as text, whatever the key column's type.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgConnection;
use sqlx::Connection;

use super::{ClaimedRow, EventStore, StoreAdmin, finish};
use crate::error::Result;
use crate::model::{ClaimedEvent, Event, EventId, NewEvent, ReclaimReport};

/// Database handle. Owns a single Postgres connection.
pub struct PgStore {
    conn: PgConnection,
}

impl PgStore {
    /// Connect to Postgres.
    pub async fn connect(url: &str) -> Result<Self> {
        let conn = PgConnection::connect(url).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl EventStore for PgStore {
    async fn claim(&mut self, at: DateTime<Utc>) -> Result<Option<ClaimedEvent>> {
        let mut tx = self.conn.begin().await?;
        let result = claim_on(&mut tx, at).await;
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
        let result = reclaim_on(&mut tx, release_before, purge_before).await;
        finish(tx, result).await
    }

    async fn fetch(&mut self, id: &EventId) -> Result<Option<Event>> {
        let row: Option<EventRow> = sqlx::query_as(
            "SELECT id::TEXT AS id, idempotency_key, event_type, payload, processed, in_progress,
                    processing_date
             FROM events WHERE id::TEXT = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&mut self.conn)
        .await?;

        Ok(row.map(Event::from))
    }
}

#[async_trait]
impl StoreAdmin for PgStore {
    async fn ensure_schema(&mut self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS events (
                id              BIGSERIAL PRIMARY KEY,
                idempotency_key TEXT NOT NULL DEFAULT '',
                event_type      TEXT NOT NULL,
                payload         TEXT NOT NULL,
                processed       BOOLEAN NOT NULL DEFAULT FALSE,
                in_progress     BOOLEAN NOT NULL DEFAULT FALSE,
                processing_date TIMESTAMPTZ
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
            "INSERT INTO events (idempotency_key, event_type, payload)
             VALUES ($1, $2, $3)
             RETURNING id::TEXT",
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

async fn claim_on(conn: &mut PgConnection, at: DateTime<Utc>) -> Result<Option<ClaimedEvent>> {
    let row: Option<ClaimedRow> = sqlx::query_as(
        "UPDATE events
         SET in_progress = TRUE,
             processing_date = $1
         WHERE id = (
             SELECT id
             FROM events
             WHERE processed = FALSE AND in_progress = FALSE
             LIMIT 1
             FOR UPDATE SKIP LOCKED
         )
         RETURNING id::TEXT AS id, idempotency_key, event_type, payload",
    )
    .bind(at)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(ClaimedEvent::from))
}

async fn complete_on(conn: &mut PgConnection, id: &EventId) -> Result<bool> {
    let rows_affected = sqlx::query(
        "UPDATE events
         SET processed = TRUE
         WHERE id::TEXT = $1 AND processed = FALSE",
    )
    .bind(id.as_str())
    .execute(&mut *conn)
    .await?
    .rows_affected();
    Ok(rows_affected > 0)
}

async fn reclaim_on(
    conn: &mut PgConnection,
    release_before: DateTime<Utc>,
    purge_before: DateTime<Utc>,
) -> Result<ReclaimReport> {
    let released = sqlx::query(
        "UPDATE events
         SET in_progress = FALSE
         WHERE processed = FALSE
           AND in_progress = TRUE
           AND processing_date IS NOT NULL
           AND processing_date <= $1",
    )
    .bind(release_before)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    let deleted = sqlx::query(
        "DELETE FROM events
         WHERE processing_date IS NOT NULL
           AND processing_date <= $1",
    )
    .bind(purge_before)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    Ok(ReclaimReport { released, deleted })
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    idempotency_key: String,
    event_type: String,
    payload: String,
    processed: bool,
    in_progress: bool,
    processing_date: Option<DateTime<Utc>>,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Self {
            id: EventId::from(row.id),
            idempotency_key: row.idempotency_key,
            event_type: row.event_type,
            payload: row.payload,
            processed: row.processed,
            in_progress: row.in_progress,
            processing_date: row.processing_date,
        }
    }
}
