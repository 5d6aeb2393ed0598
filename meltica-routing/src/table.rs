//! Versioned routing table (component C3).

use std::collections::HashMap;
use std::sync::Arc;

use meltica_core::{EventType, Sequence};
use parking_lot::RwLock;

use crate::route::Route;

struct Inner {
    routes: HashMap<EventType, Route>,
    version: Sequence,
}

/// Set of routes keyed by canonical type, plus a monotonically increasing version bumped on
/// every mutation. Created empty at boot; never garbage-collected; readers snapshot under a
/// single mutex so the dispatcher can stamp a consistent version on every event it publishes.
#[derive(Clone)]
pub struct RoutingTable {
    inner: Arc<RwLock<Inner>>,
}

impl std::fmt::Debug for RoutingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("RoutingTable")
            .field("routes", &inner.routes.len())
            .field("version", &inner.version.value())
            .finish()
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingTable {
    pub fn new() -> Self {
        Self { inner: Arc::new(RwLock::new(Inner { routes: HashMap::new(), version: Sequence::new(0) })) }
    }

    /// Current version, to be stamped onto events published under it.
    pub fn version(&self) -> u64 {
        self.inner.read().version.value()
    }

    pub fn get(&self, canonical_type: EventType) -> Option<Route> {
        self.inner.read().routes.get(&canonical_type).cloned()
    }

    /// Inserts or replaces the route for its canonical type, bumping the version.
    pub fn upsert(&self, route: Route) -> u64 {
        let mut inner = self.inner.write();
        inner.routes.insert(route.canonical_type, route);
        inner.version.fetch_add();
        inner.version.value()
    }

    /// Removes the route for `canonical_type` if present, bumping the version regardless (a
    /// no-op remove still represents a control-plane decision worth a new version).
    pub fn remove(&self, canonical_type: EventType) -> (Option<Route>, u64) {
        let mut inner = self.inner.write();
        let removed = inner.routes.remove(&canonical_type);
        inner.version.fetch_add();
        (removed, inner.version.value())
    }

    /// Deep-copies every route, sorted by canonical type for deterministic iteration.
    pub fn snapshot(&self) -> Vec<Route> {
        let inner = self.inner.read();
        let mut routes: Vec<Route> = inner.routes.values().cloned().collect();
        routes.sort_by_key(|r| r.canonical_type);
        routes
    }
}
