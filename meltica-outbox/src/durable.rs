//! Durability wrapper around [`meltica_bus::EventBus`] (component C5).

use std::sync::Arc;
use std::time::Duration;

use meltica_core::{EventEnvelope, PoolManager};
use meltica_bus::{EventBus, PublishOutcome};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::OutboxError;
use crate::record::OutboxRecord;
use crate::store::OutboxStore;

/// Wraps an [`EventBus`] so every publish is durably recorded before the inner publish runs,
/// and a background worker replays anything the inner publish failed to deliver the first
/// time. Subscribe/Unsubscribe/Close delegate to the inner bus unchanged; [`DurableBus::close`]
/// stops the replay worker first so it never races a bus already being torn down.
pub struct DurableBus {
    inner: EventBus,
    pool: PoolManager,
    store: Arc<dyn OutboxStore>,
    cancel: CancellationToken,
    replay_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for DurableBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableBus").finish_non_exhaustive()
    }
}

impl DurableBus {
    pub fn new(inner: EventBus, pool: PoolManager, store: Arc<dyn OutboxStore>) -> Self {
        Self { inner, pool, store, cancel: CancellationToken::new(), replay_task: Mutex::new(None) }
    }

    /// Enqueues an outbox record, then delegates to the inner bus. The outbox row is marked
    /// delivered or failed according to the inner result, but a failure is not propagated to
    /// the caller — the record survives for the replay worker to retry.
    pub async fn publish(&self, ctx: &CancellationToken, event: Box<EventEnvelope>) -> Result<(), OutboxError> {
        let payload = serde_json::to_value(event.as_ref())?;
        let record = OutboxRecord::pending(&event, payload);
        let id = record.id;
        self.store.insert(record).await?;

        match self.inner.publish(ctx, event).await {
            Ok(_) => self.store.mark_delivered(id).await?,
            Err(err) => {
                warn!(%err, outbox_id = %id, "inner publish failed, outbox row kept for replay");
                self.store.mark_failed(id, &err.to_string()).await?;
            }
        }
        Ok(())
    }

    pub fn subscribe(
        &self,
        ctx: CancellationToken,
        event_type: meltica_core::EventType,
        buffer_size: usize,
    ) -> meltica_bus::Subscription {
        self.inner.subscribe(ctx, event_type, buffer_size)
    }

    pub fn unsubscribe(&self, id: meltica_bus::SubscriptionId) {
        self.inner.unsubscribe(id);
    }

    /// Starts the background worker polling `list_pending` every `interval`, rehydrating up to
    /// `batch_size` rows per tick into pooled records and replaying them through the inner bus.
    pub fn start_replay_worker(self: &Arc<Self>, interval: Duration, batch_size: usize) {
        let this = self.clone();
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => this.replay_once(batch_size).await,
                }
            }
        });
        *self.replay_task.lock() = Some(handle);
    }

    async fn replay_once(&self, batch_size: usize) {
        let pending = match self.store.list_pending(batch_size).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!(%err, "failed to list pending outbox rows");
                return;
            }
        };

        for record in pending {
            self.replay_one(record).await;
        }
    }

    async fn replay_one(&self, record: OutboxRecord) {
        let id = record.id;
        let envelope: EventEnvelope = match serde_json::from_value(record.payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(%err, outbox_id = %id, "failed to deserialise outbox payload, marking failed");
                let _ = self.store.mark_failed(id, &err.to_string()).await;
                return;
            }
        };

        let mut pooled = match self.pool.borrow_event(&self.cancel).await {
            Ok(pooled) => pooled,
            Err(err) => {
                warn!(%err, outbox_id = %id, "no pooled record available for replay, will retry next tick");
                return;
            }
        };
        *pooled = envelope;

        match self.inner.publish(&self.cancel, pooled).await {
            Ok(_) => {
                let _ = self.store.mark_delivered(id).await;
            }
            Err(err) => {
                let _ = self.store.mark_failed(id, &err.to_string()).await;
            }
        }
    }

    /// Stops the replay worker, then closes the inner bus.
    pub async fn close(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.replay_task.lock().take() {
            let _ = handle.await;
        }
        self.inner.close();
    }
}

#[cfg(test)]
mod tests {
    use meltica_core::schema::{Payload, TradePayload};
    use meltica_core::pool::EVENT_POOL_NAME;

    use super::*;
    use crate::store::MemoryOutboxStore;

    fn trade_event(id: &str) -> Box<EventEnvelope> {
        Box::new(EventEnvelope::new(id, "binance", "BTC-USDT", Payload::Trade(TradePayload::default())))
    }

    async fn pool_and_bus() -> (PoolManager, EventBus) {
        let pool = PoolManager::new();
        pool.register_event_pool(4, 4).await.unwrap();
        let bus = EventBus::new(pool.clone(), 2, meltica_bus::DEFAULT_EXTENSION_CAP);
        (pool, bus)
    }

    #[tokio::test]
    async fn publish_marks_delivered_when_inner_succeeds() {
        let (pool, bus) = pool_and_bus().await;
        let store = Arc::new(MemoryOutboxStore::new());
        let durable = DurableBus::new(bus, pool, store.clone());
        let ctx = CancellationToken::new();
        let sub = durable.subscribe(ctx.clone(), meltica_core::EventType::Trade, 4);

        durable.publish(&ctx, trade_event("e1")).await.unwrap();
        assert!(sub.recv().await.is_some());
        assert_eq!(store.list_pending(10).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn replay_worker_delivers_a_record_that_failed_once() {
        // A zero-size wait queue so exhausting the pool fails the first publish immediately
        // instead of awaiting a free slot.
        let pool = PoolManager::new();
        pool.register_event_pool(1, 0).await.unwrap();
        let bus = EventBus::new(pool.clone(), 2, meltica_bus::DEFAULT_EXTENSION_CAP);
        let store = Arc::new(MemoryOutboxStore::new());

        let ctx = CancellationToken::new();
        let hog = pool.borrow_event(&ctx).await.unwrap();

        let durable = Arc::new(DurableBus::new(bus, pool.clone(), store.clone()));
        let sub = durable.subscribe(ctx.clone(), meltica_core::EventType::Trade, 4);

        durable.publish(&ctx, trade_event("e2")).await.unwrap();
        assert_eq!(store.list_pending(10).await.unwrap().len(), 1);

        pool.return_event(hog).await;

        durable.replay_once(4).await;
        assert_eq!(store.list_pending(10).await.unwrap().len(), 0);
        let received = sub.recv().await.unwrap();
        assert_eq!(received.id.as_str(), "e2");
        assert_eq!(pool.in_use(EVENT_POOL_NAME).await, Some(1));
    }

    #[tokio::test]
    async fn close_stops_worker_before_bus() {
        let (pool, bus) = pool_and_bus().await;
        let store = Arc::new(MemoryOutboxStore::new());
        let durable = Arc::new(DurableBus::new(bus, pool, store));
        durable.start_replay_worker(Duration::from_millis(5), 10);
        durable.close().await;
        let task = durable.replay_task.lock().take();
        assert!(task.is_none_or(|h| h.is_finished()));
    }
}
