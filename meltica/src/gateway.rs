//! Wires components C1-C11 into one runnable data plane.
//!
//! Nothing in here is novel: the gateway is the dispatcher + bus + provider manager wiring
//! that `meltica-dispatcher`'s own doc comment describes, lifted one level up so a binary only
//! has to construct a [`Gateway`] instead of threading `PoolManager`/`RoutingTable`/`Registry`
//! by hand.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use meltica_bus::{EventBus, PublishOutcome, Subscription, SubscriptionId};
use meltica_core::{EventEnvelope, EventType, PoolManager};
use meltica_dispatcher::{DedupMap, DispatchStats, DispatcherRuntime, ErrorChannel, Publisher};
use meltica_outbox::DurableBus;
use meltica_provider::{
    Instance, InstanceFactory, OrderRequest, ProviderLifecycleManager, ProviderMetadata, ProviderSpec, ProviderStatus, ProviderStore,
    Registry,
};
use meltica_routing::{Route, RouteKey, RoutingTable};
use parking_lot::Mutex as SyncMutex;
use smol_str::SmolStr;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::MelticaError;

/// Knobs for the pieces [`Gateway::new`] assembles; everything else (adapter factories, the
/// provider store, the outbox store) is supplied by the caller because those are external
/// collaborators this crate never owns.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub event_pool_capacity: usize,
    pub event_pool_wait_queue: usize,
    pub fanout_workers: usize,
    pub extension_cap: usize,
    pub subscriber_buffer_size: usize,
    pub dedup_gc_threshold: usize,
    pub dispatch_error_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            event_pool_capacity: 1024,
            event_pool_wait_queue: 256,
            fanout_workers: 16,
            extension_cap: meltica_bus::DEFAULT_EXTENSION_CAP,
            subscriber_buffer_size: 256,
            dedup_gc_threshold: 4096,
            dispatch_error_capacity: 256,
        }
    }
}

/// Either a plain [`EventBus`] or the durable wrapper around one, unified behind the handful
/// of operations a [`Gateway`] needs. Kept as an enum rather than a trait object because
/// `DurableBus::close` is async and `EventBus::close` is not — matching each variant's own
/// shape is simpler than forcing one through a shared async trait.
#[derive(Clone)]
pub enum GatewayBus {
    Plain(EventBus),
    Durable(Arc<DurableBus>),
}

impl std::fmt::Debug for GatewayBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayBus::Plain(_) => f.write_str("GatewayBus::Plain"),
            GatewayBus::Durable(_) => f.write_str("GatewayBus::Durable"),
        }
    }
}

impl GatewayBus {
    pub fn subscribe(&self, ctx: CancellationToken, event_type: EventType, buffer_size: usize) -> Subscription {
        match self {
            GatewayBus::Plain(bus) => bus.subscribe(ctx, event_type, buffer_size),
            GatewayBus::Durable(bus) => bus.subscribe(ctx, event_type, buffer_size),
        }
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        match self {
            GatewayBus::Plain(bus) => bus.unsubscribe(id),
            GatewayBus::Durable(bus) => bus.unsubscribe(id),
        }
    }

    pub async fn close(&self) {
        match self {
            GatewayBus::Plain(bus) => bus.close(),
            GatewayBus::Durable(bus) => bus.close().await,
        }
    }
}

#[async_trait]
impl Publisher for GatewayBus {
    async fn publish(&self, ctx: &CancellationToken, event: Box<EventEnvelope>) -> Result<(), String> {
        match self {
            GatewayBus::Plain(bus) => bus.publish(ctx, event).await.map(|_: PublishOutcome| ()).map_err(|err| err.to_string()),
            GatewayBus::Durable(bus) => bus.publish(ctx, event).await.map_err(|err| err.to_string()),
        }
    }
}

/// A running provider's dispatcher task plus the handle needed to tear it down again.
struct DispatcherHandle {
    runtime: Arc<DispatcherRuntime>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns every leaf component (pool, routing table, registry, provider manager, bus) and the
/// per-provider dispatcher tasks that connect an adapter's event channel to the bus. This is
/// the one type a binary assembling the gateway needs to construct. Cheaply `Clone` (every
/// field is itself a handle to shared state) so a background task spawned off one method can
/// hold its own owned copy instead of an `Arc<Gateway>`.
#[derive(Clone)]
pub struct Gateway {
    pools: PoolManager,
    routes: RoutingTable,
    registry: Arc<Registry>,
    providers: Arc<ProviderLifecycleManager>,
    bus: GatewayBus,
    dispatchers: Arc<SyncMutex<HashMap<SmolStr, DispatcherHandle>>>,
    config: GatewayConfig,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway").field("bus", &self.bus).field("dispatchers", &self.dispatchers.lock().len()).finish_non_exhaustive()
    }
}

impl Gateway {
    /// Registers the canonical event pool and wires a provider manager around `store`, plain
    /// `EventBus` flavour. Use [`Gateway::with_durable_bus`] for the outbox-backed variant.
    pub async fn new(config: GatewayConfig, store: Arc<dyn ProviderStore>) -> Result<Self, MelticaError> {
        let pools = PoolManager::new();
        pools.register_event_pool(config.event_pool_capacity, config.event_pool_wait_queue).await?;
        let bus = EventBus::new(pools.clone(), config.fanout_workers, config.extension_cap);
        Self::assemble(config, store, pools, GatewayBus::Plain(bus))
    }

    /// Same assembly as [`Gateway::new`], but publishes go through a [`DurableBus`] backed by
    /// `outbox_store` so a publish that fails is replayed rather than lost.
    pub async fn with_durable_bus(
        config: GatewayConfig,
        provider_store: Arc<dyn ProviderStore>,
        outbox_store: Arc<dyn meltica_outbox::OutboxStore>,
        replay_interval: Duration,
        replay_batch_size: usize,
    ) -> Result<Self, MelticaError> {
        let pools = PoolManager::new();
        pools.register_event_pool(config.event_pool_capacity, config.event_pool_wait_queue).await?;
        let inner = EventBus::new(pools.clone(), config.fanout_workers, config.extension_cap);
        let durable = Arc::new(DurableBus::new(inner, pools.clone(), outbox_store));
        durable.start_replay_worker(replay_interval, replay_batch_size);
        Self::assemble(config, provider_store, pools, GatewayBus::Durable(durable))
    }

    fn assemble(config: GatewayConfig, store: Arc<dyn ProviderStore>, pools: PoolManager, bus: GatewayBus) -> Result<Self, MelticaError> {
        let registry = Arc::new(Registry::new());
        let providers = Arc::new(ProviderLifecycleManager::new(registry.clone(), pools.clone(), store));
        Ok(Self {
            pools,
            routes: RoutingTable::new(),
            registry,
            providers,
            bus,
            dispatchers: Arc::new(SyncMutex::new(HashMap::new())),
            config,
        })
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    pub fn register_adapter(&self, identifier: impl Into<SmolStr>, factory: Arc<dyn InstanceFactory>) {
        self.registry.register(identifier, factory);
    }

    pub async fn create_provider(&self, spec: ProviderSpec, start: bool) -> Result<(), MelticaError> {
        self.providers.create(spec.clone(), false).await?;
        if start {
            self.start_provider(&spec.name).await?;
        }
        Ok(())
    }

    /// Starts the provider, then takes its event/error channels and spawns a
    /// [`DispatcherRuntime`] task bridging them to the bus. A no-op on the dispatcher side if
    /// the instance never exposes a channel (already taken, or the adapter is channel-less).
    pub async fn start_provider(&self, name: &str) -> Result<(), MelticaError> {
        self.providers.start_provider(name).await?;
        if let Some(events) = self.providers.take_events(name)? {
            self.wire_dispatcher(name, events);
        }
        info!(provider = %name, "provider started and dispatcher wired");
        Ok(())
    }

    /// Non-blocking variant of [`Self::start_provider`]: returns as soon as the lifecycle
    /// manager's Starting transition lands, then wires the dispatcher from a background task
    /// once the provider actually reaches `Running` (polling its status, since the adapter dial
    /// itself runs off this call's stack).
    pub async fn start_provider_async(&self, name: &str) -> Result<(), MelticaError> {
        self.providers.start_provider_async(name).await?;
        let gateway = self.clone();
        let name = SmolStr::new(name);
        tokio::spawn(async move {
            loop {
                match gateway.providers.metadata(&name).map(|metadata| metadata.status) {
                    Some(ProviderStatus::Starting) => tokio::time::sleep(Duration::from_millis(25)).await,
                    Some(ProviderStatus::Running) => {
                        match gateway.providers.take_events(&name) {
                            Ok(Some(events)) => gateway.wire_dispatcher(&name, events),
                            Ok(None) => {}
                            Err(err) => warn!(provider = %name, %err, "failed to take events after async start"),
                        }
                        break;
                    }
                    _ => break,
                }
            }
        });
        Ok(())
    }

    /// Takes a provider's pooled-event channel and spawns the [`DispatcherRuntime`] task that
    /// bridges it to the bus, replacing (and cancelling) any dispatcher already wired for the
    /// same name.
    fn wire_dispatcher(&self, name: &str, events: tokio::sync::mpsc::Receiver<Box<EventEnvelope>>) {
        let runtime = Arc::new(DispatcherRuntime::new(
            self.pools.clone(),
            self.routes.clone(),
            Arc::new(self.bus.clone()),
            DedupMap::with_default_ttl(self.config.dedup_gc_threshold),
            self.config.dispatch_error_capacity,
        ));
        let cancel = CancellationToken::new();
        let task_runtime = runtime.clone();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            task_runtime.run(&task_cancel, events).await;
        });
        let mut dispatchers = self.dispatchers.lock();
        if let Some(previous) = dispatchers.insert(SmolStr::new(name), DispatcherHandle { runtime, cancel, task }) {
            previous.cancel.cancel();
        }
    }

    /// Stops the provider's dispatcher task first (so it observes the adapter's event channel
    /// closing rather than racing the lifecycle manager's own cancel), then stops the provider.
    pub async fn stop_provider(&self, name: &str) -> Result<(), MelticaError> {
        let handle = self.dispatchers.lock().remove(name);
        self.providers.stop_provider(name).await?;
        if let Some(handle) = handle {
            handle.cancel.cancel();
            if let Err(err) = handle.task.await {
                warn!(provider = %name, %err, "dispatcher task panicked while stopping");
            }
        }
        Ok(())
    }

    pub async fn update_provider(&self, spec: ProviderSpec, start: bool) -> Result<(), MelticaError> {
        let name = spec.name.clone();
        self.providers.update(spec, false).await?;
        if start {
            self.start_provider(&name).await?;
        }
        Ok(())
    }

    pub async fn remove_provider(&self, name: &str) -> Result<(), MelticaError> {
        self.stop_provider(name).await.ok();
        self.providers.remove(name).await?;
        Ok(())
    }

    pub async fn activate_route(&self, provider: &str, route: Route) -> Result<(), MelticaError> {
        self.routes.upsert(route.clone());
        self.providers.activate_route(provider, route).await?;
        Ok(())
    }

    pub async fn deactivate_route(&self, provider: &str, key: RouteKey) -> Result<(), MelticaError> {
        self.providers.deactivate_route(provider, key).await?;
        Ok(())
    }

    pub async fn submit_order(&self, provider: &str, req: OrderRequest) -> Result<(), MelticaError> {
        self.providers.submit_order(provider, req).await?;
        Ok(())
    }

    pub fn provider_metadata(&self, name: &str) -> Option<ProviderMetadata> {
        self.providers.metadata(name)
    }

    pub fn list_providers(&self) -> Vec<ProviderMetadata> {
        self.providers.list_metadata()
    }

    /// Stats for the named provider's dispatcher task, if one is currently wired.
    pub fn dispatch_stats(&self, name: &str) -> Option<DispatchStats> {
        self.dispatchers.lock().get(name).map(|handle| handle.runtime.stats())
    }

    /// The dispatcher error channel for the named provider, if one is currently wired.
    pub fn dispatch_errors(&self, name: &str) -> Option<Arc<ErrorChannel>> {
        self.dispatchers.lock().get(name).map(|handle| handle.runtime.errors())
    }

    pub fn subscribe(&self, ctx: CancellationToken, event_type: EventType, buffer_size: usize) -> Subscription {
        self.bus.subscribe(ctx, event_type, buffer_size)
    }

    /// Same as [`Gateway::subscribe`], using the gateway's configured default buffer size.
    pub fn subscribe_default(&self, ctx: CancellationToken, event_type: EventType) -> Subscription {
        self.subscribe(ctx, event_type, self.config.subscriber_buffer_size)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.bus.unsubscribe(id);
    }

    /// Stops every wired dispatcher, closes the bus, then drains the pool's wait queue.
    pub async fn shutdown(&self, deadline: Duration) {
        let handles: Vec<DispatcherHandle> = self.dispatchers.lock().drain().map(|(_, handle)| handle).collect();
        for handle in handles {
            handle.cancel.cancel();
            let _ = handle.task.await;
        }
        self.bus.close().await;
        self.pools.shutdown(deadline).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use meltica_core::schema::{EventType as SchemaEventType, Payload, TradePayload};
    use meltica_provider::MemoryProviderStore;
    use meltica_routing::RouteAdapter;
    use tokio::sync::mpsc;

    struct StubInstance {
        events_rx: SyncMutex<Option<mpsc::Receiver<Box<EventEnvelope>>>>,
    }

    #[async_trait]
    impl RouteAdapter for StubInstance {
        async fn subscribe_route(&self, _route: &Route) -> Result<(), String> {
            Ok(())
        }
        async fn unsubscribe_route(&self, _route: &Route) -> Result<(), String> {
            Ok(())
        }
    }

    #[async_trait]
    impl Instance for StubInstance {
        fn name(&self) -> &str {
            "stub"
        }
        async fn start(&self, _ctx: CancellationToken) -> Result<(), String> {
            Ok(())
        }
        async fn submit_order(&self, _req: OrderRequest) -> Result<(), String> {
            Ok(())
        }
        fn instruments(&self) -> Vec<SmolStr> {
            Vec::new()
        }
        fn take_events(&self) -> Option<mpsc::Receiver<Box<EventEnvelope>>> {
            self.events_rx.lock().take()
        }
        fn take_errors(&self) -> Option<mpsc::Receiver<String>> {
            None
        }
    }

    struct StubFactory {
        events_rx: SyncMutex<Option<mpsc::Receiver<Box<EventEnvelope>>>>,
    }

    #[async_trait]
    impl InstanceFactory for StubFactory {
        async fn create(&self, _ctx: CancellationToken, _pools: PoolManager, _config: meltica_provider::ProviderConfig) -> Result<Arc<dyn Instance>, String> {
            Ok(Arc::new(StubInstance { events_rx: SyncMutex::new(self.events_rx.lock().take()) }))
        }
    }

    #[tokio::test]
    async fn starting_a_provider_wires_a_dispatcher_that_forwards_events_to_the_bus() {
        let gateway = Gateway::new(GatewayConfig::default(), Arc::new(MemoryProviderStore::new())).await.unwrap();
        let (tx, rx) = mpsc::channel(4);
        gateway.register_adapter("stub", Arc::new(StubFactory { events_rx: SyncMutex::new(Some(rx)) }));

        let ctx = CancellationToken::new();
        let sub = gateway.subscribe(ctx.clone(), SchemaEventType::Trade, 4);

        gateway
            .create_provider(ProviderSpec::new("v1", "stub", meltica_provider::ProviderConfig::default()), true)
            .await
            .unwrap();

        tx.send(Box::new(EventEnvelope::new("e1", "v1", "BTC-USDT", Payload::Trade(TradePayload::default())))).await.unwrap();

        let received = sub.recv().await.unwrap();
        assert_eq!(received.id.as_str(), "e1");
        assert_eq!(gateway.dispatch_stats("v1").unwrap().published, 1);

        gateway.shutdown(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn start_provider_async_wires_a_dispatcher_once_running() {
        let gateway = Gateway::new(GatewayConfig::default(), Arc::new(MemoryProviderStore::new())).await.unwrap();
        let (tx, rx) = mpsc::channel(4);
        gateway.register_adapter("stub", Arc::new(StubFactory { events_rx: SyncMutex::new(Some(rx)) }));

        gateway.providers.create(ProviderSpec::new("v1", "stub", meltica_provider::ProviderConfig::default()), false).await.unwrap();

        let ctx = CancellationToken::new();
        let sub = gateway.subscribe(ctx.clone(), SchemaEventType::Trade, 4);

        gateway.start_provider_async("v1").await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while gateway.dispatch_stats("v1").is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        tx.send(Box::new(EventEnvelope::new("e1", "v1", "BTC-USDT", Payload::Trade(TradePayload::default())))).await.unwrap();
        let received = sub.recv().await.unwrap();
        assert_eq!(received.id.as_str(), "e1");

        gateway.shutdown(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn stopping_a_provider_removes_its_dispatcher() {
        let gateway = Gateway::new(GatewayConfig::default(), Arc::new(MemoryProviderStore::new())).await.unwrap();
        let (_tx, rx) = mpsc::channel(4);
        gateway.register_adapter("stub", Arc::new(StubFactory { events_rx: SyncMutex::new(Some(rx)) }));
        gateway
            .create_provider(ProviderSpec::new("v1", "stub", meltica_provider::ProviderConfig::default()), true)
            .await
            .unwrap();
        assert!(gateway.dispatch_stats("v1").is_some());

        gateway.stop_provider("v1").await.unwrap();
        assert!(gateway.dispatch_stats("v1").is_none());
    }
}
