//! Provider lifecycle manager (component C9): owns the Pending → Starting → Running/Failed →
//! Stopped state machine for every provider, serialising mutations through one lock while
//! letting adapter factory calls happen outside it.

use std::collections::HashMap;
use std::sync::Arc;

use meltica_core::PoolManager;
use meltica_routing::{Route, RouteAdapter, SubscriptionManager};
use parking_lot::RwLock;
use serde_json::Value;
use smol_str::SmolStr;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::instance::{Instance, OrderRequest};
use crate::registry::Registry;
use crate::spec::ProviderSpec;
use crate::store::{ProviderSnapshot, ProviderStore};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ProviderStatus {
    Pending,
    Starting,
    Running,
    Stopped,
    Failed,
}

/// A sanitised read-only view of one provider's state, safe to expose through the control
/// boundary (never carries the live instance handle or raw config).
#[derive(Debug, Clone)]
pub struct ProviderMetadata {
    pub name: SmolStr,
    pub adapter_identifier: SmolStr,
    pub status: ProviderStatus,
    pub config: BTreeMap<String, Value>,
    pub last_error: Option<String>,
}

struct ProviderEntry {
    spec: ProviderSpec,
    status: ProviderStatus,
    instance: Option<Arc<dyn Instance>>,
    subscriptions: Option<Arc<SubscriptionManager>>,
    cancel: Option<CancellationToken>,
    last_error: Option<String>,
    /// Routes active the moment this provider was last stopped, re-applied on the next start.
    cached_routes: Vec<Route>,
}

impl ProviderEntry {
    fn pending(spec: ProviderSpec) -> Self {
        Self { spec, status: ProviderStatus::Pending, instance: None, subscriptions: None, cancel: None, last_error: None, cached_routes: Vec::new() }
    }
}

pub struct ProviderLifecycleManager {
    registry: Arc<Registry>,
    pools: PoolManager,
    store: Arc<dyn ProviderStore>,
    providers: RwLock<HashMap<SmolStr, ProviderEntry>>,
}

impl std::fmt::Debug for ProviderLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderLifecycleManager").field("providers", &self.providers.read().len()).finish_non_exhaustive()
    }
}

impl ProviderLifecycleManager {
    pub fn new(registry: Arc<Registry>, pools: PoolManager, store: Arc<dyn ProviderStore>) -> Self {
        Self { registry, pools, store, providers: RwLock::new(HashMap::new()) }
    }

    /// Normalises name/adapter, rejects duplicates, stores Pending state, and optionally
    /// triggers `start_provider`.
    pub async fn create(&self, spec: ProviderSpec, start: bool) -> Result<(), ProviderError> {
        let name = spec.name.clone();
        {
            let mut providers = self.providers.write();
            if providers.contains_key(&name) {
                return Err(ProviderError::ProviderExists(name));
            }
            providers.insert(name.clone(), ProviderEntry::pending(spec));
        }
        self.persist(&name).await?;
        if start {
            self.start_provider(&name).await?;
        }
        Ok(())
    }

    /// Transitions Pending/Stopped/Failed → Starting under the lock, then invokes the adapter
    /// factory outside it so a slow dial never blocks other provider mutations.
    pub async fn start_provider(&self, name: &str) -> Result<(), ProviderError> {
        let (spec, cached_routes) = self.begin_start(name)?;
        self.finish_start(name, spec, cached_routes).await
    }

    /// Non-blocking variant of [`Self::start_provider`]: performs the Starting transition
    /// synchronously (so a caller sees it reflected immediately) and spawns the adapter
    /// dial/instantiation in the background instead of waiting for it.
    pub async fn start_provider_async(self: &Arc<Self>, name: &str) -> Result<(), ProviderError> {
        let (spec, cached_routes) = self.begin_start(name)?;
        let this = self.clone();
        let name = SmolStr::from(name);
        tokio::spawn(async move {
            if let Err(err) = this.finish_start(&name, spec, cached_routes).await {
                warn!(provider = %name, %err, "async provider start failed");
            }
        });
        Ok(())
    }

    /// Synchronous half of starting a provider: validates the current status and transitions it
    /// to `Starting` under the lock, handing back the spec and cached routes the async half
    /// needs.
    fn begin_start(&self, name: &str) -> Result<(ProviderSpec, Vec<Route>), ProviderError> {
        let mut providers = self.providers.write();
        let entry = providers.get_mut(name).ok_or_else(|| ProviderError::ProviderNotFound(name.into()))?;
        match entry.status {
            ProviderStatus::Running => return Err(ProviderError::ProviderRunning(name.into())),
            ProviderStatus::Starting => return Err(ProviderError::ProviderStarting(name.into())),
            ProviderStatus::Pending | ProviderStatus::Stopped | ProviderStatus::Failed => {}
        }
        entry.status = ProviderStatus::Starting;
        Ok((entry.spec.clone(), std::mem::take(&mut entry.cached_routes)))
    }

    /// Asynchronous half of starting a provider: dials the adapter and, on success, re-applies
    /// cached routes and transitions to `Running` (or `Failed` on error).
    async fn finish_start(&self, name: &str, spec: ProviderSpec, cached_routes: Vec<Route>) -> Result<(), ProviderError> {
        let identifier = spec.resolved_adapter_identifier();
        let cancel = CancellationToken::new();
        let outcome = self.registry.create(&identifier, cancel.clone(), self.pools.clone(), spec.config.clone()).await;

        match outcome {
            Ok(instance) => {
                if let Err(err) = instance.start(cancel.clone()).await {
                    self.mark_failed(name, err);
                    self.persist(name).await?;
                    return Ok(());
                }
                let adapter: Arc<dyn RouteAdapter> = instance.clone();
                let subscriptions = Arc::new(SubscriptionManager::new(adapter));
                for route in &cached_routes {
                    if let Err(err) = subscriptions.activate(route.clone()).await {
                        warn!(provider = %name, %err, "failed to re-apply a cached route on start");
                    }
                }
                {
                    let mut providers = self.providers.write();
                    if let Some(entry) = providers.get_mut(name) {
                        entry.status = ProviderStatus::Running;
                        entry.instance = Some(instance);
                        entry.subscriptions = Some(subscriptions);
                        entry.cancel = Some(cancel);
                        entry.last_error = None;
                    }
                }
                info!(provider = %name, "started");
                self.persist(name).await?;
                Ok(())
            }
            Err(err) => {
                self.mark_failed(name, err.to_string());
                self.persist(name).await?;
                Ok(())
            }
        }
    }

    fn mark_failed(&self, name: &str, error: String) {
        let mut providers = self.providers.write();
        if let Some(entry) = providers.get_mut(name) {
            entry.status = ProviderStatus::Failed;
            entry.last_error = Some(error);
            entry.instance = None;
            entry.subscriptions = None;
            entry.cancel = None;
        }
    }

    /// Captures active routes into the cache, cancels the adapter context, and transitions to
    /// Stopped.
    pub async fn stop_provider(&self, name: &str) -> Result<(), ProviderError> {
        let (subscriptions, cancel) = {
            let mut providers = self.providers.write();
            let entry = providers.get_mut(name).ok_or_else(|| ProviderError::ProviderNotFound(name.into()))?;
            entry.status = ProviderStatus::Stopped;
            entry.instance = None;
            entry.last_error = None;
            (entry.subscriptions.take(), entry.cancel.take())
        };

        let cached_routes = match &subscriptions {
            Some(subs) => subs.snapshot().await,
            None => Vec::new(),
        };
        {
            let mut providers = self.providers.write();
            if let Some(entry) = providers.get_mut(name) {
                entry.cached_routes = cached_routes;
            }
        }
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        self.persist(name).await?;
        self.store.save_routes(name, self.routes_snapshot(name)).await.map_err(ProviderError::Persistence)?;
        info!(provider = %name, "stopped");
        Ok(())
    }

    fn routes_snapshot(&self, name: &str) -> Vec<Route> {
        self.providers.read().get(name).map(|entry| entry.cached_routes.clone()).unwrap_or_default()
    }

    /// Stops if running, replaces the spec, and optionally restarts, re-applying persisted
    /// routes either way.
    pub async fn update(&self, spec: ProviderSpec, start: bool) -> Result<(), ProviderError> {
        let name = spec.name.clone();
        let was_running = {
            let providers = self.providers.read();
            let entry = providers.get(&name).ok_or_else(|| ProviderError::ProviderNotFound(name.clone()))?;
            entry.status == ProviderStatus::Running
        };
        if was_running {
            self.stop_provider(&name).await?;
        }
        {
            let mut providers = self.providers.write();
            let entry = providers.get_mut(&name).ok_or_else(|| ProviderError::ProviderNotFound(name.clone()))?;
            entry.spec = spec;
        }
        self.persist(&name).await?;
        if start {
            self.start_provider(&name).await?;
        }
        Ok(())
    }

    pub async fn remove(&self, name: &str) -> Result<(), ProviderError> {
        let exists = {
            let mut providers = self.providers.write();
            match providers.remove(name) {
                Some(entry) => {
                    if let Some(cancel) = entry.cancel {
                        cancel.cancel();
                    }
                    true
                }
                None => false,
            }
        };
        if !exists {
            return Err(ProviderError::ProviderNotFound(name.into()));
        }
        self.store.delete_provider(name).await.map_err(ProviderError::Persistence)?;
        self.store.delete_routes(name).await.map_err(ProviderError::Persistence)?;
        Ok(())
    }

    /// Rebuilds Pending/Stopped state from persisted snapshots without starting anything.
    /// Running/Starting snapshots are demoted to Stopped: nothing is live until `start_provider`
    /// is called again.
    pub async fn restore(&self) -> Result<(), ProviderError> {
        let snapshots = self.store.load_providers().await.map_err(ProviderError::Persistence)?;
        let mut providers = self.providers.write();
        for snapshot in snapshots {
            let status = match snapshot.status {
                ProviderStatus::Running | ProviderStatus::Starting => ProviderStatus::Stopped,
                other => other,
            };
            let spec = ProviderSpec::new(snapshot.name.as_str(), snapshot.adapter_identifier.as_str(), ProviderConfig::new(snapshot.config));
            let mut entry = ProviderEntry::pending(spec);
            entry.status = status;
            providers.insert(snapshot.name, entry);
        }
        Ok(())
    }

    pub async fn activate_route(&self, provider: &str, route: Route) -> Result<(), ProviderError> {
        let subscriptions = self.running_subscriptions(provider)?;
        subscriptions.activate(route).await?;
        Ok(())
    }

    pub async fn deactivate_route(&self, provider: &str, key: meltica_routing::RouteKey) -> Result<(), ProviderError> {
        let subscriptions = self.running_subscriptions(provider)?;
        subscriptions.deactivate(&key).await?;
        Ok(())
    }

    /// Takes the running instance's pooled-event receiver, if one hasn't already been taken.
    /// Intended to be called once right after `start_provider` succeeds, by whoever wires this
    /// provider's events into a dispatcher runtime.
    pub fn take_events(&self, provider: &str) -> Result<Option<tokio::sync::mpsc::Receiver<Box<meltica_core::EventEnvelope>>>, ProviderError> {
        let providers = self.providers.read();
        let entry = providers.get(provider).ok_or_else(|| ProviderError::ProviderNotFound(provider.into()))?;
        Ok(entry.instance.as_ref().and_then(|instance| instance.take_events()))
    }

    /// Takes the running instance's transport-error receiver, same take-once semantics as
    /// [`Self::take_events`].
    pub fn take_errors(&self, provider: &str) -> Result<Option<tokio::sync::mpsc::Receiver<String>>, ProviderError> {
        let providers = self.providers.read();
        let entry = providers.get(provider).ok_or_else(|| ProviderError::ProviderNotFound(provider.into()))?;
        Ok(entry.instance.as_ref().and_then(|instance| instance.take_errors()))
    }

    pub async fn submit_order(&self, provider: &str, req: OrderRequest) -> Result<(), ProviderError> {
        let instance = {
            let providers = self.providers.read();
            let entry = providers.get(provider).ok_or_else(|| ProviderError::ProviderNotFound(provider.into()))?;
            match entry.status {
                ProviderStatus::Running => entry.instance.clone().expect("Running implies a live instance"),
                _ => return Err(ProviderError::ProviderNotRunning(provider.into())),
            }
        };
        instance.submit_order(req).await.map_err(ProviderError::Adapter)
    }

    fn running_subscriptions(&self, provider: &str) -> Result<Arc<SubscriptionManager>, ProviderError> {
        let providers = self.providers.read();
        let entry = providers.get(provider).ok_or_else(|| ProviderError::ProviderNotFound(provider.into()))?;
        match &entry.subscriptions {
            Some(subscriptions) if entry.status == ProviderStatus::Running => Ok(subscriptions.clone()),
            _ => Err(ProviderError::ProviderNotRunning(provider.into())),
        }
    }

    /// Metadata projection with sensitive config fragments blanked, safe for the control
    /// boundary.
    pub fn metadata(&self, name: &str) -> Option<ProviderMetadata> {
        let providers = self.providers.read();
        providers.get(name).map(|entry| ProviderMetadata {
            name: entry.spec.name.clone(),
            adapter_identifier: entry.spec.resolved_adapter_identifier(),
            status: entry.status,
            config: entry.spec.config.sanitized(),
            last_error: entry.last_error.clone(),
        })
    }

    pub fn list_metadata(&self) -> Vec<ProviderMetadata> {
        let providers = self.providers.read();
        let mut names: Vec<SmolStr> = providers.keys().cloned().collect();
        names.sort();
        drop(providers);
        names.into_iter().filter_map(|name| self.metadata(&name)).collect()
    }

    async fn persist(&self, name: &str) -> Result<(), ProviderError> {
        let snapshot = {
            let providers = self.providers.read();
            let entry = providers.get(name).ok_or_else(|| ProviderError::ProviderNotFound(name.into()))?;
            ProviderSnapshot {
                name: entry.spec.name.clone(),
                adapter_identifier: entry.spec.resolved_adapter_identifier(),
                config: entry.spec.config.sanitized(),
                status: entry.status,
            }
        };
        self.store.save_provider(snapshot).await.map_err(ProviderError::Persistence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::OrderRequest;
    use crate::registry::Registry;
    use crate::store::MemoryProviderStore;
    use async_trait::async_trait;
    use meltica_core::schema::{EventType, OrderType, Side};
    use meltica_routing::Route;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingInstance {
        subscribe_calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RouteAdapter for CountingInstance {
        async fn subscribe_route(&self, _route: &Route) -> Result<(), String> {
            self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn unsubscribe_route(&self, _route: &Route) -> Result<(), String> {
            Ok(())
        }
    }

    #[async_trait]
    impl Instance for CountingInstance {
        fn name(&self) -> &str {
            "counting"
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
        fn take_events(&self) -> Option<tokio::sync::mpsc::Receiver<Box<meltica_core::EventEnvelope>>> {
            None
        }
        fn take_errors(&self) -> Option<tokio::sync::mpsc::Receiver<String>> {
            None
        }
    }

    struct CountingFactory {
        subscribe_calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl crate::instance::InstanceFactory for CountingFactory {
        async fn create(&self, _ctx: CancellationToken, _pools: PoolManager, _config: ProviderConfig) -> Result<Arc<dyn Instance>, String> {
            Ok(Arc::new(CountingInstance { subscribe_calls: self.subscribe_calls.clone() }))
        }
    }

    fn manager(subscribe_calls: Arc<AtomicUsize>) -> ProviderLifecycleManager {
        let registry = Arc::new(Registry::new());
        registry.register("counting", Arc::new(CountingFactory { subscribe_calls }));
        ProviderLifecycleManager::new(registry, PoolManager::new(), Arc::new(MemoryProviderStore::new()))
    }

    fn route() -> Route {
        Route::new(EventType::Trade, "v1", vec!["btcusdt@trade"], vec![], vec![])
    }

    #[tokio::test]
    async fn create_rejects_a_duplicate_name() {
        let manager = manager(Arc::new(AtomicUsize::new(0)));
        let spec = ProviderSpec::new("v1", "counting", ProviderConfig::default());
        manager.create(spec.clone(), false).await.unwrap();
        let err = manager.create(spec, false).await.unwrap_err();
        assert!(matches!(err, ProviderError::ProviderExists(_)));
    }

    #[tokio::test]
    async fn start_provider_transitions_to_running_and_reapplies_cached_routes_on_restart() {
        let calls = Arc::new(AtomicUsize::new(0));
        let manager = manager(calls.clone());
        let spec = ProviderSpec::new("v1", "counting", ProviderConfig::default());
        manager.create(spec, true).await.unwrap();
        assert_eq!(manager.metadata("v1").unwrap().status, ProviderStatus::Running);

        manager.activate_route("v1", route()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        manager.stop_provider("v1").await.unwrap();
        assert_eq!(manager.metadata("v1").unwrap().status, ProviderStatus::Stopped);

        manager.start_provider("v1").await.unwrap();
        assert_eq!(manager.metadata("v1").unwrap().status, ProviderStatus::Running);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn submit_order_fails_when_the_provider_is_not_running() {
        let manager = manager(Arc::new(AtomicUsize::new(0)));
        let spec = ProviderSpec::new("v1", "counting", ProviderConfig::default());
        manager.create(spec, false).await.unwrap();
        let req = OrderRequest {
            client_order_id: "c1".into(),
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            price: Default::default(),
            quantity: Default::default(),
        };
        let err = manager.submit_order("v1", req).await.unwrap_err();
        assert!(matches!(err, ProviderError::ProviderNotRunning(_)));
    }

    #[tokio::test]
    async fn start_provider_on_unknown_name_fails() {
        let manager = manager(Arc::new(AtomicUsize::new(0)));
        let err = manager.start_provider("ghost").await.unwrap_err();
        assert!(matches!(err, ProviderError::ProviderNotFound(_)));
    }
}
