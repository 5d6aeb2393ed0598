//! Adapter identifier to factory registry (component C11).

use std::collections::HashMap;
use std::sync::Arc;

use meltica_core::PoolManager;
use parking_lot::RwLock;
use smol_str::SmolStr;
use tokio_util::sync::CancellationToken;

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::instance::{Instance, InstanceFactory};

/// Maps an adapter identifier to the factory that builds a live [`Instance`] for it.
pub struct Registry {
    factories: RwLock<HashMap<SmolStr, Arc<dyn InstanceFactory>>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("adapters", &self.factories.read().len()).finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self { factories: RwLock::new(HashMap::new()) }
    }

    pub fn register(&self, identifier: impl Into<SmolStr>, factory: Arc<dyn InstanceFactory>) {
        self.factories.write().insert(identifier.into(), factory);
    }

    pub async fn create(
        &self,
        identifier: &str,
        ctx: CancellationToken,
        pools: PoolManager,
        config: ProviderConfig,
    ) -> Result<Arc<dyn Instance>, ProviderError> {
        let factory = self
            .factories
            .read()
            .get(identifier)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownAdapter(identifier.into()))?;
        factory.create(ctx, pools, config).await.map_err(ProviderError::Adapter)
    }
}
