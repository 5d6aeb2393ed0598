//! Dispatcher runtime (component C10): the single point every pooled event from an adapter
//! passes through before reaching the bus.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use meltica_core::{EventEnvelope, PoolManager};
use meltica_routing::RoutingTable;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::dedup::DedupMap;
use crate::error::DispatchError;
use crate::errors::ErrorChannel;
use crate::publisher::Publisher;

/// Counters surfaced for observability; cheap to snapshot, no locking beyond the atomics.
#[derive(Debug, Default, Clone, Copy)]
pub struct DispatchStats {
    pub published: u64,
    pub duplicates: u64,
    pub publish_failures: u64,
}

/// Consumes one adapter's channel of pooled [`EventEnvelope`]s, stamping emit time and routing
/// version, dropping duplicates, and forwarding everything else to a [`Publisher`]. Runs until
/// the source channel closes or `ctx` is cancelled.
pub struct DispatcherRuntime {
    pool: PoolManager,
    routes: RoutingTable,
    dedup: DedupMap,
    publisher: Arc<dyn Publisher>,
    errors: Arc<ErrorChannel>,
    stats: parking_lot::Mutex<DispatchStats>,
}

impl std::fmt::Debug for DispatcherRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherRuntime").field("stats", &*self.stats.lock()).finish_non_exhaustive()
    }
}

impl DispatcherRuntime {
    pub fn new(
        pool: PoolManager,
        routes: RoutingTable,
        publisher: Arc<dyn Publisher>,
        dedup: DedupMap,
        error_capacity: usize,
    ) -> Self {
        Self {
            pool,
            routes,
            dedup,
            publisher,
            errors: Arc::new(ErrorChannel::new(error_capacity)),
            stats: parking_lot::Mutex::new(DispatchStats::default()),
        }
    }

    pub fn errors(&self) -> Arc<ErrorChannel> {
        self.errors.clone()
    }

    pub fn stats(&self) -> DispatchStats {
        *self.stats.lock()
    }

    /// Drains `source` until it closes or `ctx` is cancelled. Intended to be spawned as its own
    /// task per adapter.
    pub async fn run(&self, ctx: &CancellationToken, mut source: mpsc::Receiver<Box<EventEnvelope>>) {
        loop {
            let event = tokio::select! {
                biased;
                _ = ctx.cancelled() => break,
                event = source.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.handle_one(ctx, event).await;
        }
        self.errors.close();
        debug!(stats = ?self.stats(), "dispatcher runtime stopped");
    }

    async fn handle_one(&self, ctx: &CancellationToken, mut event: Box<EventEnvelope>) {
        if event.emit_time == DateTime::<Utc>::UNIX_EPOCH {
            event.emit_time = Utc::now();
        }
        event.routing_version = self.routes.version();

        if self.dedup.check_and_insert(event.id.as_str()) {
            self.stats.lock().duplicates += 1;
            self.pool.return_event(event).await;
            return;
        }

        let id = event.id.clone();
        match self.publisher.publish(ctx, event).await {
            Ok(()) => {
                self.stats.lock().published += 1;
            }
            Err(err) => {
                self.stats.lock().publish_failures += 1;
                warn!(event_id = %id, %err, "publish failed");
                self.errors.push(DispatchError::PublishRejected(err));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use meltica_core::schema::{Payload, TradePayload};
    use meltica_core::EventType;
    use meltica_routing::Route;
    use parking_lot::Mutex as SyncMutex;

    use super::*;

    struct RecordingPublisher {
        received: SyncMutex<Vec<Box<EventEnvelope>>>,
        fail_next: SyncMutex<bool>,
    }

    impl RecordingPublisher {
        fn new() -> Self {
            Self { received: SyncMutex::new(Vec::new()), fail_next: SyncMutex::new(false) }
        }
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, _ctx: &CancellationToken, event: Box<EventEnvelope>) -> Result<(), String> {
            if *self.fail_next.lock() {
                *self.fail_next.lock() = false;
                return Err("boom".into());
            }
            self.received.lock().push(event);
            Ok(())
        }
    }

    async fn pool() -> PoolManager {
        let pool = PoolManager::new();
        pool.register_event_pool(8, 8).await.unwrap();
        pool
    }

    fn trade(id: &str) -> Box<EventEnvelope> {
        Box::new(EventEnvelope::new(id, "binance", "BTC-USDT", Payload::Trade(TradePayload::default())))
    }

    #[tokio::test]
    async fn fresh_event_is_stamped_and_published() {
        let pool = pool().await;
        let routes = RoutingTable::new();
        routes.upsert(Route::new(EventType::Trade, "binance", ["btcusdt@trade"], Vec::new(), Vec::new()));
        let publisher = Arc::new(RecordingPublisher::new());
        let runtime = DispatcherRuntime::new(
            pool,
            routes.clone(),
            publisher.clone(),
            DedupMap::with_default_ttl(1024),
            8,
        );
        let ctx = CancellationToken::new();

        runtime.handle_one(&ctx, trade("e1")).await;

        let received = publisher.received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].routing_version, routes.version());
        assert_ne!(received[0].emit_time, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(runtime.stats().published, 1);
    }

    #[tokio::test]
    async fn duplicate_event_is_returned_to_the_pool_and_not_published() {
        let pool = pool().await;
        let routes = RoutingTable::new();
        let publisher = Arc::new(RecordingPublisher::new());
        let runtime = DispatcherRuntime::new(
            pool.clone(),
            routes,
            publisher.clone(),
            DedupMap::with_default_ttl(1024),
            8,
        );
        let ctx = CancellationToken::new();

        runtime.handle_one(&ctx, trade("dup")).await;
        runtime.handle_one(&ctx, trade("dup")).await;

        assert_eq!(publisher.received.lock().len(), 1);
        assert_eq!(runtime.stats().duplicates, 1);
    }

    #[tokio::test]
    async fn publish_failure_is_recorded_on_the_error_channel() {
        let pool = pool().await;
        let routes = RoutingTable::new();
        let publisher = Arc::new(RecordingPublisher::new());
        *publisher.fail_next.lock() = true;
        let runtime = DispatcherRuntime::new(
            pool,
            routes,
            publisher.clone(),
            DedupMap::with_default_ttl(1024),
            8,
        );
        let ctx = CancellationToken::new();

        runtime.handle_one(&ctx, trade("e2")).await;

        assert_eq!(runtime.stats().publish_failures, 1);
        let error = runtime.errors().recv(&ctx).await.unwrap();
        assert!(matches!(error, DispatchError::PublishRejected(msg) if msg == "boom"));
    }

    #[tokio::test]
    async fn run_drains_until_the_source_channel_closes() {
        let pool = pool().await;
        let routes = RoutingTable::new();
        let publisher = Arc::new(RecordingPublisher::new());
        let runtime = DispatcherRuntime::new(
            pool,
            routes,
            publisher.clone(),
            DedupMap::with_default_ttl(1024),
            8,
        );
        let ctx = CancellationToken::new();
        let (tx, rx) = mpsc::channel(4);
        tx.send(trade("e3")).await.unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), runtime.run(&ctx, rx)).await.unwrap();

        assert_eq!(publisher.received.lock().len(), 1);
    }
}
