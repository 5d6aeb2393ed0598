//! Postgres-backed [`OutboxStore`], gated behind the `postgres` feature so a caller that only
//! needs the in-memory store never pulls in `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::Row;
use uuid::Uuid;

use crate::error::OutboxError;
use crate::record::{OutboxHeaders, OutboxRecord};
use crate::store::OutboxStore;

/// `events_outbox` schema, per the outbox record data model: persistent id, aggregate
/// type/id, event type, serialised payload, headers, availability time, delivered flag,
/// attempt count, last error, and timestamps.
pub const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS events_outbox (
    id UUID PRIMARY KEY,
    aggregate_type TEXT NOT NULL,
    aggregate_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    payload JSONB NOT NULL,
    headers JSONB NOT NULL,
    available_at TIMESTAMPTZ NOT NULL,
    published_at TIMESTAMPTZ NULL,
    delivered BOOLEAN NOT NULL DEFAULT FALSE,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS events_outbox_pending_idx ON events_outbox (delivered, available_at);
"#;

pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs [`CREATE_TABLE_SQL`] against the pool. Callers with a migration pipeline should
    /// prefer running the same statement there instead.
    pub async fn ensure_schema(&self) -> Result<(), OutboxError> {
        sqlx::raw_sql(CREATE_TABLE_SQL).execute(&self.pool).await?;
        Ok(())
    }

    fn row_to_record(row: sqlx::postgres::PgRow) -> Result<OutboxRecord, OutboxError> {
        let headers: serde_json::Value = row.try_get("headers")?;
        Ok(OutboxRecord {
            id: row.try_get("id")?,
            aggregate_type: row.try_get::<String, _>("aggregate_type")?.into(),
            aggregate_id: row.try_get::<String, _>("aggregate_id")?.into(),
            event_type: row.try_get::<String, _>("event_type")?.into(),
            payload: row.try_get("payload")?,
            headers: serde_json::from_value::<OutboxHeaders>(headers)?,
            available_at: row.try_get::<DateTime<Utc>, _>("available_at")?,
            delivered: row.try_get("delivered")?,
            attempts: row.try_get::<i32, _>("attempts")? as u32,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            published_at: row.try_get::<Option<DateTime<Utc>>, _>("published_at")?,
        })
    }
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn insert(&self, record: OutboxRecord) -> Result<(), OutboxError> {
        let headers = serde_json::to_value(&record.headers)?;
        sqlx::query(
            r#"
            INSERT INTO events_outbox
                (id, aggregate_type, aggregate_id, event_type, payload, headers,
                 available_at, published_at, delivered, attempts, last_error, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(record.id)
        .bind(record.aggregate_type.as_str())
        .bind(record.aggregate_id.as_str())
        .bind(record.event_type.as_str())
        .bind(&record.payload)
        .bind(&headers)
        .bind(record.available_at)
        .bind(record.published_at)
        .bind(record.delivered)
        .bind(record.attempts as i32)
        .bind(&record.last_error)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_delivered(&self, id: Uuid) -> Result<(), OutboxError> {
        sqlx::query("UPDATE events_outbox SET delivered = TRUE, published_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), OutboxError> {
        sqlx::query("UPDATE events_outbox SET attempts = attempts + 1, last_error = $2 WHERE id = $1")
            .bind(id)
            .bind(error)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<OutboxRecord>, OutboxError> {
        let rows = sqlx::query(
            "SELECT * FROM events_outbox WHERE NOT delivered ORDER BY available_at ASC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn delete(&self, id: Uuid) -> Result<(), OutboxError> {
        sqlx::query("DELETE FROM events_outbox WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(())
    }
}
