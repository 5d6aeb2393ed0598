//! Persistence boundary (component C11): the lifecycle manager never touches storage
//! directly, only this trait, so a SQL- or file-backed implementation can be swapped in later.

use std::collections::HashMap;

use async_trait::async_trait;
use meltica_routing::Route;
use parking_lot::Mutex;
use serde_json::Value;
use smol_str::SmolStr;
use std::collections::BTreeMap;

use crate::lifecycle::ProviderStatus;

/// A durable projection of one provider's spec and status, enough to rebuild [`ProviderStatus`]
/// on [`crate::ProviderLifecycleManager::restore`] without re-running `Start`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSnapshot {
    pub name: SmolStr,
    pub adapter_identifier: SmolStr,
    pub config: BTreeMap<String, Value>,
    pub status: ProviderStatus,
}

#[async_trait]
pub trait ProviderStore: Send + Sync {
    async fn save_provider(&self, snapshot: ProviderSnapshot) -> Result<(), String>;
    async fn delete_provider(&self, name: &str) -> Result<(), String>;
    async fn load_providers(&self) -> Result<Vec<ProviderSnapshot>, String>;
    async fn save_routes(&self, provider: &str, routes: Vec<Route>) -> Result<(), String>;
    async fn load_routes(&self, provider: &str) -> Result<Vec<Route>, String>;
    async fn delete_routes(&self, provider: &str) -> Result<(), String>;
}

/// In-memory reference implementation; production deployments back this with the control
/// plane's own database.
#[derive(Default)]
pub struct MemoryProviderStore {
    providers: Mutex<HashMap<SmolStr, ProviderSnapshot>>,
    routes: Mutex<HashMap<SmolStr, Vec<Route>>>,
}

impl std::fmt::Debug for MemoryProviderStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryProviderStore").finish_non_exhaustive()
    }
}

impl MemoryProviderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProviderStore for MemoryProviderStore {
    async fn save_provider(&self, snapshot: ProviderSnapshot) -> Result<(), String> {
        self.providers.lock().insert(snapshot.name.clone(), snapshot);
        Ok(())
    }

    async fn delete_provider(&self, name: &str) -> Result<(), String> {
        self.providers.lock().remove(name);
        Ok(())
    }

    async fn load_providers(&self) -> Result<Vec<ProviderSnapshot>, String> {
        Ok(self.providers.lock().values().cloned().collect())
    }

    async fn save_routes(&self, provider: &str, routes: Vec<Route>) -> Result<(), String> {
        self.routes.lock().insert(SmolStr::new(provider), routes);
        Ok(())
    }

    async fn load_routes(&self, provider: &str) -> Result<Vec<Route>, String> {
        Ok(self.routes.lock().get(provider).cloned().unwrap_or_default())
    }

    async fn delete_routes(&self, provider: &str) -> Result<(), String> {
        self.routes.lock().remove(provider);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(name: &str) -> ProviderSnapshot {
        ProviderSnapshot { name: name.into(), adapter_identifier: "binance".into(), config: BTreeMap::new(), status: ProviderStatus::Pending }
    }

    #[tokio::test]
    async fn save_and_load_round_trips_a_provider_snapshot() {
        let store = MemoryProviderStore::new();
        store.save_provider(snapshot("v1")).await.unwrap();
        let loaded = store.load_providers().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "v1");
    }

    #[tokio::test]
    async fn delete_provider_removes_it_from_subsequent_loads() {
        let store = MemoryProviderStore::new();
        store.save_provider(snapshot("v1")).await.unwrap();
        store.delete_provider("v1").await.unwrap();
        assert!(store.load_providers().await.unwrap().is_empty());
    }
}
