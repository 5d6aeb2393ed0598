//! Persistence boundary for outbox records, plus an in-memory reference implementation used
//! by tests and by callers that don't need durability across restarts.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::OutboxError;
use crate::record::OutboxRecord;

/// Durable storage for outbox rows. A `Store` only needs to support the operations the C5
/// component actually performs: append on publish, mark on settle, and list pending for the
/// background replay worker.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn insert(&self, record: OutboxRecord) -> Result<(), OutboxError>;
    async fn mark_delivered(&self, id: Uuid) -> Result<(), OutboxError>;
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), OutboxError>;
    /// Rows with `delivered = false`, oldest first, capped at `limit`.
    async fn list_pending(&self, limit: usize) -> Result<Vec<OutboxRecord>, OutboxError>;
    /// Removes a row outright, e.g. after a successful replay has been acknowledged downstream.
    async fn delete(&self, id: Uuid) -> Result<(), OutboxError>;
}

/// In-memory [`OutboxStore`]. Always compiled; the default choice when a caller doesn't need
/// the records to survive a process restart.
#[derive(Debug, Default)]
pub struct MemoryOutboxStore {
    records: Mutex<HashMap<Uuid, OutboxRecord>>,
}

impl MemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OutboxStore for MemoryOutboxStore {
    async fn insert(&self, record: OutboxRecord) -> Result<(), OutboxError> {
        self.records.lock().insert(record.id, record);
        Ok(())
    }

    async fn mark_delivered(&self, id: Uuid) -> Result<(), OutboxError> {
        let mut records = self.records.lock();
        let record = records.get_mut(&id).ok_or(OutboxError::NotFound(id))?;
        record.mark_delivered();
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), OutboxError> {
        let mut records = self.records.lock();
        let record = records.get_mut(&id).ok_or(OutboxError::NotFound(id))?;
        record.mark_failed(error);
        Ok(())
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<OutboxRecord>, OutboxError> {
        let records = self.records.lock();
        let mut pending: Vec<OutboxRecord> = records.values().filter(|r| !r.delivered).cloned().collect();
        pending.sort_by_key(|r| r.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn delete(&self, id: Uuid) -> Result<(), OutboxError> {
        self.records.lock().remove(&id).ok_or(OutboxError::NotFound(id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use meltica_core::schema::{Payload, TradePayload};
    use meltica_core::EventEnvelope;

    use super::*;

    fn record() -> OutboxRecord {
        let event = EventEnvelope::new("e1", "binance", "BTC-USDT", Payload::Trade(TradePayload::default()));
        OutboxRecord::pending(&event, serde_json::json!({}))
    }

    #[tokio::test]
    async fn list_pending_excludes_delivered_rows() {
        let store = MemoryOutboxStore::new();
        let record = record();
        let id = record.id;
        store.insert(record).await.unwrap();
        assert_eq!(store.list_pending(10).await.unwrap().len(), 1);

        store.mark_delivered(id).await.unwrap();
        assert_eq!(store.list_pending(10).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn mark_failed_on_unknown_id_errors() {
        let store = MemoryOutboxStore::new();
        let err = store.mark_failed(Uuid::new_v4(), "boom").await.unwrap_err();
        assert!(matches!(err, OutboxError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_removes_the_row() {
        let store = MemoryOutboxStore::new();
        let record = record();
        let id = record.id;
        store.insert(record).await.unwrap();

        store.delete(id).await.unwrap();

        assert_eq!(store.list_pending(10).await.unwrap().len(), 0);
        assert!(matches!(store.delete(id).await.unwrap_err(), OutboxError::NotFound(_)));
    }
}
