//! Per-subscriber bounded queue with drop-oldest-on-full semantics.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use meltica_core::{EventEnvelope, EventType};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Opaque handle identifying a subscription, returned by `subscribe` and consumed by
/// `unsubscribe`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Outcome of offering a clone to a subscriber's queue.
pub(crate) enum Offer {
    Delivered,
    DeliveredAfterDroppingOldest(Box<EventEnvelope>),
    /// The subscriber's context is cancelled; the clone must be recycled by the caller.
    Cancelled(Box<EventEnvelope>),
}

pub(crate) struct Subscriber {
    pub id: SubscriptionId,
    pub event_type: EventType,
    buffer: Mutex<VecDeque<Box<EventEnvelope>>>,
    capacity: usize,
    notify: Notify,
    pub cancel: CancellationToken,
    dropped: AtomicU64,
}

impl Subscriber {
    pub fn new(id: SubscriptionId, event_type: EventType, capacity: usize, cancel: CancellationToken) -> Self {
        Self {
            id,
            event_type,
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            cancel,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Non-blocking send with a single drop-oldest-and-retry, per the delivery primitive: if
    /// the subscriber's context is already done the clone is handed back untouched for the
    /// caller to recycle; otherwise an empty slot is pushed into directly, or, if full, the
    /// oldest queued clone is evicted and handed back so the caller can recycle it.
    pub(crate) fn offer(&self, clone: Box<EventEnvelope>) -> Offer {
        if self.cancel.is_cancelled() {
            return Offer::Cancelled(clone);
        }
        let mut buffer = self.buffer.lock();
        if buffer.len() < self.capacity {
            buffer.push_back(clone);
            drop(buffer);
            self.notify.notify_one();
            return Offer::Delivered;
        }
        let oldest = buffer.pop_front();
        buffer.push_back(clone);
        drop(buffer);
        self.notify.notify_one();
        self.dropped.fetch_add(1, Ordering::Relaxed);
        Offer::DeliveredAfterDroppingOldest(oldest.expect("capacity is never zero"))
    }

    /// Waits for and pops the next queued clone, or returns `None` once cancelled with an
    /// empty buffer.
    pub async fn recv(&self) -> Option<Box<EventEnvelope>> {
        loop {
            if let Some(item) = self.buffer.lock().pop_front() {
                return Some(item);
            }
            if self.cancel.is_cancelled() {
                return None;
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = self.cancel.cancelled() => {
                    if let Some(item) = self.buffer.lock().pop_front() {
                        return Some(item);
                    }
                    return None;
                }
            }
        }
    }
}

/// Handle returned from [`crate::bus::EventBus::subscribe`]; receives clones of every
/// matching-type event published while it is alive.
#[derive(Clone)]
pub struct Subscription {
    pub(crate) id: SubscriptionId,
    pub(crate) inner: Arc<Subscriber>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish_non_exhaustive()
    }
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Receives the next event, or `None` once the subscription's context has been cancelled
    /// and the buffer has drained.
    pub async fn recv(&self) -> Option<Box<EventEnvelope>> {
        self.inner.recv().await
    }

    /// Count of clones dropped due to buffer overflow over this subscription's lifetime.
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> Box<EventEnvelope> {
        Box::new(EventEnvelope::default())
    }

    #[test]
    fn offer_delivers_while_buffer_has_room() {
        let sub = Subscriber::new(SubscriptionId::new(1), EventType::Trade, 2, CancellationToken::new());
        assert!(matches!(sub.offer(envelope()), Offer::Delivered));
        assert!(matches!(sub.offer(envelope()), Offer::Delivered));
    }

    #[test]
    fn offer_drops_oldest_once_full() {
        let sub = Subscriber::new(SubscriptionId::new(1), EventType::Trade, 1, CancellationToken::new());
        assert!(matches!(sub.offer(envelope()), Offer::Delivered));
        assert!(matches!(sub.offer(envelope()), Offer::DeliveredAfterDroppingOldest(_)));
        assert_eq!(sub.dropped_count(), 1);
    }

    #[test]
    fn offer_to_cancelled_subscriber_hands_clone_back() {
        let token = CancellationToken::new();
        token.cancel();
        let sub = Subscriber::new(SubscriptionId::new(1), EventType::Trade, 1, token);
        assert!(matches!(sub.offer(envelope()), Offer::Cancelled(_)));
    }

    #[tokio::test]
    async fn recv_returns_none_after_cancel_with_empty_buffer() {
        let token = CancellationToken::new();
        let sub = Arc::new(Subscriber::new(SubscriptionId::new(1), EventType::Trade, 1, token.clone()));
        token.cancel();
        assert!(sub.recv().await.is_none());
    }
}
