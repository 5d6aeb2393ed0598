//! Bounded object pools of reusable records (component C1).
//!
//! Named, fixed-capacity pools with a bounded wait queue of borrowers. The canonical use is
//! [`EventEnvelope`](crate::schema::EventEnvelope) recycling across [`meltica_bus`]'s fan-out,
//! but the manager is generic over anything implementing [`Poolable`] so an outbox replay
//! worker or an order-book assembler can register its own pool of scratch records.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::schema::EventEnvelope;

/// Name of the canonical event pool, used by [`PoolManager::borrow_event`]/[`PoolManager::return_event`].
pub const EVENT_POOL_NAME: &str = "event";

/// Trait implemented by every record type a [`PoolManager`] can hold.
///
/// `reset` must zero any payload so a borrower never observes a previous holder's data.
pub trait Poolable: Send + 'static {
    fn reset(&mut self);
}

impl Poolable for EventEnvelope {
    fn reset(&mut self) {
        EventEnvelope::reset(self);
    }
}

/// Errors surfaced by pool operations: resource-exhausted and invalid-input cases.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("pool '{0}' is already registered")]
    AlreadyRegistered(String),
    #[error("pool '{0}' is not registered")]
    UnknownPool(String),
    #[error("pool '{0}' wait queue is full")]
    PoolExhausted(String),
    #[error("borrow from pool '{0}' was cancelled")]
    Cancelled(String),
}

/// Type-erased control surface every concrete [`Pool<T>`] exposes to the manager, so
/// [`PoolManager::shutdown`] can drain every pool without knowing their record types.
#[async_trait]
trait ErasedPool: Send + Sync {
    async fn shutdown(&self, deadline: Duration);
    fn in_use(&self) -> usize;
    fn capacity(&self) -> usize;
}

struct Pool<T: Poolable> {
    name: String,
    capacity: usize,
    free: SyncMutex<VecDeque<Box<T>>>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
    /// One permit per record currently sitting in `free` or yet to be created.
    available: Semaphore,
    /// Bounds the number of borrowers simultaneously waiting on `available`.
    wait_queue: Semaphore,
}

impl<T: Poolable> Pool<T> {
    fn new(name: String, capacity: usize, wait_queue_size: usize, factory: Box<dyn Fn() -> T + Send + Sync>) -> Self {
        Self {
            name,
            capacity,
            free: SyncMutex::new(VecDeque::with_capacity(capacity)),
            factory,
            available: Semaphore::new(capacity),
            wait_queue: Semaphore::new(wait_queue_size),
        }
    }

    fn take_or_make(&self) -> Box<T> {
        if let Some(record) = self.free.lock().pop_front() {
            record
        } else {
            Box::new((self.factory)())
        }
    }

    async fn borrow(&self, ctx: &CancellationToken) -> Result<Box<T>, PoolError> {
        // Fast path: a permit is free right now, no need to occupy a wait-queue slot.
        if let Ok(permit) = self.available.try_acquire() {
            permit.forget();
            return Ok(self.take_or_make());
        }

        let _queue_slot = self
            .wait_queue
            .try_acquire()
            .map_err(|_| PoolError::PoolExhausted(self.name.clone()))?;

        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(PoolError::Cancelled(self.name.clone())),
            permit = self.available.acquire() => {
                let permit = permit.map_err(|_| PoolError::UnknownPool(self.name.clone()))?;
                permit.forget();
                Ok(self.take_or_make())
            }
        }
    }

    async fn borrow_batch(&self, ctx: &CancellationToken, n: usize) -> Result<Vec<Box<T>>, PoolError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let n32 = u32::try_from(n).unwrap_or(u32::MAX);

        let permits = if let Ok(permits) = self.available.try_acquire_many(n32) {
            permits
        } else {
            let _queue_slot = self
                .wait_queue
                .try_acquire()
                .map_err(|_| PoolError::PoolExhausted(self.name.clone()))?;

            tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(PoolError::Cancelled(self.name.clone())),
                permits = self.available.acquire_many(n32) => {
                    permits.map_err(|_| PoolError::UnknownPool(self.name.clone()))?
                }
            }
        };
        permits.forget();

        Ok((0..n).map(|_| self.take_or_make()).collect())
    }

    fn return_record(&self, mut record: Box<T>) {
        record.reset();
        self.free.lock().push_back(record);
        self.available.add_permits(1);
    }
}

#[async_trait]
impl<T: Poolable> ErasedPool for Pool<T> {
    async fn shutdown(&self, deadline: Duration) {
        let deadline_at = tokio::time::Instant::now() + deadline;
        while self.available.available_permits() < self.capacity {
            if tokio::time::Instant::now() >= deadline_at {
                warn!(pool = %self.name, "shutdown deadline reached with borrows still outstanding");
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        debug!(pool = %self.name, "pool drained cleanly");
    }

    fn in_use(&self) -> usize {
        self.capacity - self.available.available_permits()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

struct Registered {
    typed: Arc<dyn Any + Send + Sync>,
    erased: Arc<dyn ErasedPool>,
}

/// Owner of every named pool in the process.
///
/// Clone is cheap (an `Arc` internally) so adapters and the bus can share one manager.
#[derive(Clone)]
pub struct PoolManager {
    pools: Arc<RwLock<HashMap<String, Registered>>>,
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager").finish_non_exhaustive()
    }
}

impl Default for PoolManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolManager {
    pub fn new() -> Self {
        Self { pools: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Registers a named pool. Must happen before the first [`Self::borrow`] of that name.
    pub async fn register_pool<T: Poolable>(
        &self,
        name: impl Into<String>,
        capacity: usize,
        wait_queue_size: usize,
        factory: impl Fn() -> T + Send + Sync + 'static,
    ) -> Result<(), PoolError> {
        let name = name.into();
        let mut pools = self.pools.write().await;
        if pools.contains_key(&name) {
            return Err(PoolError::AlreadyRegistered(name));
        }
        let pool = Arc::new(Pool::new(name.clone(), capacity, wait_queue_size, Box::new(factory)));
        pools.insert(name, Registered { typed: pool.clone(), erased: pool });
        Ok(())
    }

    /// Convenience wrapper for the canonical [`EventEnvelope`] pool.
    pub async fn register_event_pool(&self, capacity: usize, wait_queue_size: usize) -> Result<(), PoolError> {
        self.register_pool(EVENT_POOL_NAME, capacity, wait_queue_size, EventEnvelope::default).await
    }

    async fn typed_pool<T: Poolable>(&self, name: &str) -> Result<Arc<Pool<T>>, PoolError> {
        let pools = self.pools.read().await;
        let entry = pools.get(name).ok_or_else(|| PoolError::UnknownPool(name.to_string()))?;
        entry
            .typed
            .clone()
            .downcast::<Pool<T>>()
            .map_err(|_| PoolError::UnknownPool(name.to_string()))
    }

    pub async fn borrow<T: Poolable>(&self, name: &str, ctx: &CancellationToken) -> Result<Box<T>, PoolError> {
        self.typed_pool::<T>(name).await?.borrow(ctx).await
    }

    pub async fn borrow_batch<T: Poolable>(
        &self,
        name: &str,
        ctx: &CancellationToken,
        n: usize,
    ) -> Result<Vec<Box<T>>, PoolError> {
        self.typed_pool::<T>(name).await?.borrow_batch(ctx, n).await
    }

    /// Returns a record to its pool. Records from an unknown pool are dropped silently, per
    /// the component contract — a stale or misnamed pool must never panic a subscriber.
    pub async fn give_back<T: Poolable>(&self, name: &str, record: Box<T>) {
        match self.typed_pool::<T>(name).await {
            Ok(pool) => pool.return_record(record),
            Err(_) => debug!(pool = name, "return to unknown pool dropped"),
        }
    }

    pub async fn borrow_event(&self, ctx: &CancellationToken) -> Result<Box<EventEnvelope>, PoolError> {
        self.borrow::<EventEnvelope>(EVENT_POOL_NAME, ctx).await
    }

    pub async fn borrow_events(
        &self,
        ctx: &CancellationToken,
        n: usize,
    ) -> Result<Vec<Box<EventEnvelope>>, PoolError> {
        self.borrow_batch::<EventEnvelope>(EVENT_POOL_NAME, ctx, n).await
    }

    pub async fn return_event(&self, record: Box<EventEnvelope>) {
        self.give_back(EVENT_POOL_NAME, record).await;
    }

    /// Number of records currently borrowed from `name`, or `None` if unregistered.
    pub async fn in_use(&self, name: &str) -> Option<usize> {
        self.pools.read().await.get(name).map(|p| p.erased.in_use())
    }

    pub async fn capacity(&self, name: &str) -> Option<usize> {
        self.pools.read().await.get(name).map(|p| p.erased.capacity())
    }

    /// Waits up to `deadline` for every registered pool to be fully returned.
    pub async fn shutdown(&self, deadline: Duration) {
        let erased: Vec<_> = self.pools.read().await.values().map(|p| p.erased.clone()).collect();
        for pool in erased {
            pool.shutdown(deadline).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn borrow_then_return_restores_capacity() {
        let manager = PoolManager::new();
        manager.register_event_pool(2, 4).await.unwrap();
        let ctx = CancellationToken::new();

        let a = manager.borrow_event(&ctx).await.unwrap();
        let b = manager.borrow_event(&ctx).await.unwrap();
        assert_eq!(manager.in_use(EVENT_POOL_NAME).await, Some(2));

        manager.return_event(a).await;
        manager.return_event(b).await;
        assert_eq!(manager.in_use(EVENT_POOL_NAME).await, Some(0));
    }

    #[tokio::test]
    async fn duplicate_registration_fails() {
        let manager = PoolManager::new();
        manager.register_event_pool(1, 1).await.unwrap();
        let err = manager.register_event_pool(1, 1).await.unwrap_err();
        assert!(matches!(err, PoolError::AlreadyRegistered(name) if name == EVENT_POOL_NAME));
    }

    #[tokio::test]
    async fn borrow_from_unknown_pool_fails() {
        let manager = PoolManager::new();
        let ctx = CancellationToken::new();
        let err = manager.borrow::<EventEnvelope>("nope", &ctx).await.unwrap_err();
        assert!(matches!(err, PoolError::UnknownPool(_)));
    }

    #[tokio::test]
    async fn return_to_unknown_pool_is_dropped_silently() {
        let manager = PoolManager::new();
        manager.give_back("nope", Box::new(EventEnvelope::default())).await;
        // No panic, nothing to assert beyond "didn't explode".
    }

    #[tokio::test]
    async fn wait_queue_full_fails_fast() {
        let manager = PoolManager::new();
        manager.register_event_pool(1, 0).await.unwrap();
        let ctx = CancellationToken::new();

        let held = manager.borrow_event(&ctx).await.unwrap();
        let err = manager.borrow_event(&ctx).await.unwrap_err();
        assert!(matches!(err, PoolError::PoolExhausted(_)));
        manager.return_event(held).await;
    }

    #[tokio::test]
    async fn borrow_batch_is_all_or_none() {
        let manager = PoolManager::new();
        manager.register_event_pool(3, 2).await.unwrap();
        let ctx = CancellationToken::new();

        let batch = manager.borrow_events(&ctx, 3).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(manager.in_use(EVENT_POOL_NAME).await, Some(3));
    }

    #[tokio::test]
    async fn cancelled_context_aborts_waiting_borrow() {
        let manager = PoolManager::new();
        manager.register_event_pool(1, 1).await.unwrap();
        let ctx = CancellationToken::new();

        let held = manager.borrow_event(&ctx).await.unwrap();
        ctx.cancel();
        let err = manager.borrow_event(&ctx).await.unwrap_err();
        assert!(matches!(err, PoolError::Cancelled(_)));
        manager.return_event(held).await;
    }

    #[tokio::test]
    async fn returned_record_has_zeroed_payload() {
        let manager = PoolManager::new();
        manager.register_event_pool(1, 1).await.unwrap();
        let ctx = CancellationToken::new();

        let mut borrowed = manager.borrow_event(&ctx).await.unwrap();
        borrowed.id = "dirty".into();
        manager.return_event(borrowed).await;

        let recycled = manager.borrow_event(&ctx).await.unwrap();
        assert_eq!(recycled.id.as_str(), "");
    }
}
