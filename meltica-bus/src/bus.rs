//! Typed pub/sub event bus with bounded per-subscriber queues (component C4).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use meltica_core::{EventEnvelope, EventType, PoolManager};
use parking_lot::RwLock as SyncRwLock;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::BusError;
use crate::subscriber::{Offer, Subscriber, Subscription, SubscriptionId};

/// Default maximum serialised size of an Extension payload the bus will accept.
pub const DEFAULT_EXTENSION_CAP: usize = meltica_core::schema::DEFAULT_EXTENSION_PAYLOAD_CAP;

/// Outcome of one [`EventBus::publish`] call, useful for metrics and the end-to-end tests.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PublishOutcome {
    /// No subscriber was registered for the event's type; the source was returned untouched.
    NoSubscribers,
    /// Delivered to every current subscriber without any buffer drop.
    Delivered { subscriber_count: usize },
    /// Delivered to every current subscriber, but at least one had to drop its oldest queued
    /// clone to make room.
    DeliveredWithDrops { subscriber_count: usize, drops: usize },
}

struct Entry {
    subscriber: Arc<Subscriber>,
}

/// Fan-out pub/sub bus. Cheap to clone (internally an `Arc`); every clone shares the same
/// subscriber table, worker pool, and backing [`PoolManager`].
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<SyncRwLock<HashMap<EventType, Vec<Entry>>>>,
    next_id: Arc<AtomicU64>,
    pool: PoolManager,
    workers: Arc<Semaphore>,
    extension_cap: usize,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .field("worker_width", &self.workers.available_permits())
            .finish_non_exhaustive()
    }
}

impl Clone for Entry {
    fn clone(&self) -> Self {
        Entry { subscriber: self.subscriber.clone() }
    }
}

impl EventBus {
    /// `worker_width` bounds how many subscriber deliveries run concurrently per publish;
    /// `extension_cap` bounds serialised Extension payload size.
    pub fn new(pool: PoolManager, worker_width: usize, extension_cap: usize) -> Self {
        Self {
            subscribers: Arc::new(SyncRwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            pool,
            workers: Arc::new(Semaphore::new(worker_width.max(1))),
            extension_cap,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Registers a new subscriber for `event_type` with the given per-subscriber buffer size.
    /// The subscription auto-closes when `ctx` is cancelled.
    pub fn subscribe(&self, ctx: CancellationToken, event_type: EventType, buffer_size: usize) -> Subscription {
        let id = SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let subscriber = Arc::new(Subscriber::new(id, event_type, buffer_size.max(1), ctx));
        self.subscribers.write().entry(event_type).or_default().push(Entry { subscriber: subscriber.clone() });
        Subscription { id, inner: subscriber }
    }

    /// Idempotent: closes the channel and removes the subscriber. No-op if `id` is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subscribers = self.subscribers.write();
        for entries in subscribers.values_mut() {
            if let Some(pos) = entries.iter().position(|e| e.subscriber.id == id) {
                let entry = entries.remove(pos);
                entry.subscriber.cancel.cancel();
                return;
            }
        }
    }

    /// Idempotent: cancels every subscriber and marks the bus closed.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut subscribers = self.subscribers.write();
        for entries in subscribers.values() {
            for entry in entries {
                entry.subscriber.cancel.cancel();
            }
        }
        subscribers.clear();
    }

    /// "Route-first, allocate-if-some": snapshots the subscriber list for the event's type,
    /// returns the source to the pool immediately if there are none, otherwise borrows exactly
    /// N clones and fans them out through the worker pool.
    pub async fn publish(&self, ctx: &CancellationToken, source: Box<EventEnvelope>) -> Result<PublishOutcome, BusError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(BusError::Closed);
        }
        source.validate(self.extension_cap)?;

        let event_type = source.event_type;
        let targets: Vec<Arc<Subscriber>> = self
            .subscribers
            .read()
            .get(&event_type)
            .map(|entries| entries.iter().map(|e| e.subscriber.clone()).collect())
            .unwrap_or_default();

        if targets.is_empty() {
            debug!(event_type = %event_type, "no_subscribers");
            self.pool.return_event(source).await;
            return Ok(PublishOutcome::NoSubscribers);
        }

        let clones = match self.pool.borrow_events(ctx, targets.len()).await {
            Ok(clones) => clones,
            Err(err) => {
                warn!(%err, "failed to borrow delivery clones");
                self.pool.return_event(source).await;
                return Err(BusError::CloneBorrowFailed(err));
            }
        };

        let mut joins = tokio::task::JoinSet::new();
        for (target, mut clone) in targets.into_iter().zip(clones.into_iter()) {
            *clone = (*source).clone();
            let pool = self.pool.clone();
            let workers = self.workers.clone();
            joins.spawn(async move {
                let _permit = workers.acquire_owned().await.expect("semaphore never closed");
                deliver(&pool, &target, clone).await
            });
        }

        let mut drops = 0usize;
        let mut delivered = 0usize;
        while let Some(result) = joins.join_next().await {
            match result {
                Ok(did_drop) => {
                    delivered += 1;
                    if did_drop {
                        drops += 1;
                    }
                }
                Err(join_err) => warn!(%join_err, "delivery task panicked"),
            }
        }

        self.pool.return_event(source).await;

        Ok(if drops > 0 {
            PublishOutcome::DeliveredWithDrops { subscriber_count: delivered, drops }
        } else {
            PublishOutcome::Delivered { subscriber_count: delivered }
        })
    }
}

/// Delivers one clone to one subscriber, recycling whatever the queue hands back. Returns
/// whether an oldest-queued clone had to be dropped to make room.
async fn deliver(pool: &PoolManager, target: &Subscriber, clone: Box<EventEnvelope>) -> bool {
    match target.offer(clone) {
        Offer::Delivered => false,
        Offer::DeliveredAfterDroppingOldest(dropped) => {
            debug!(subscriber = %target.id, "dropped oldest queued clone to make room");
            pool.return_event(dropped).await;
            true
        }
        Offer::Cancelled(clone) => {
            pool.return_event(clone).await;
            false
        }
    }
}
