//! Subscription manager (component C8): reconciles route changes against a provider adapter,
//! computing the minimal subscribe/unsubscribe calls needed instead of a blanket resubscribe.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::RoutingError;
use crate::filter::diff;
use crate::route::{Route, RouteKey};

/// The boundary a provider adapter implements so the subscription manager can push route
/// changes down to the venue connection without depending on the adapter crate directly
/// (avoids a `meltica-routing` <-> `meltica-provider` cycle).
#[async_trait]
pub trait RouteAdapter: Send + Sync {
    async fn subscribe_route(&self, route: &Route) -> Result<(), String>;
    async fn unsubscribe_route(&self, route: &Route) -> Result<(), String>;
}

/// Outcome of reconciling one route change, reported back to the caller for logging/metrics.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ReconcileOutcome {
    /// No adapter call was necessary; the normalised route was already active.
    Unchanged,
    /// A brand new route was subscribed.
    Subscribed,
    /// The route changed shape (topics/rest_polls) and was fully resubscribed.
    Resubscribed,
    /// Only filters changed; an incremental subscribe/unsubscribe delta was applied.
    FilterDeltaApplied { added: usize, removed: usize },
    /// The route was removed.
    Unsubscribed,
}

/// Tracks the set of currently active routes per `(provider, canonical_type)` and reconciles
/// incoming desired-state changes against an adapter, per the activate/deactivate semantics:
/// no existing route subscribes fresh; an equal route is a no-op; a route whose topics or REST
/// polls differ is fully resubscribed with rollback to the old route on adapter failure; a
/// route that only differs in filters is reconciled via an incremental delta.
pub struct SubscriptionManager {
    active: Mutex<HashMap<RouteKey, Route>>,
    adapter: Arc<dyn RouteAdapter>,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager").finish_non_exhaustive()
    }
}

impl SubscriptionManager {
    pub fn new(adapter: Arc<dyn RouteAdapter>) -> Self {
        Self { active: Mutex::new(HashMap::new()), adapter }
    }

    /// Applies a desired route, subscribing, resubscribing, or incrementally updating filters
    /// as needed. Returns the outcome for observability.
    pub async fn activate(&self, desired: Route) -> Result<ReconcileOutcome, RoutingError> {
        let key = desired.key();
        let mut active = self.active.lock().await;

        let Some(current) = active.get(&key).cloned() else {
            self.adapter.subscribe_route(&desired).await.map_err(|reason| RoutingError::SubscribeRejected {
                provider: key.provider.clone(),
                canonical_type: desired.canonical_type.to_string().into(),
                reason,
            })?;
            info!(provider = %key.provider, canonical_type = %key.canonical_type, "route subscribed");
            active.insert(key, desired);
            return Ok(ReconcileOutcome::Subscribed);
        };

        if current == desired {
            return Ok(ReconcileOutcome::Unchanged);
        }

        if !current.same_non_filter_fields(&desired) {
            self.adapter.unsubscribe_route(&current).await.map_err(|reason| RoutingError::UnsubscribeRejected {
                provider: key.provider.clone(),
                canonical_type: desired.canonical_type.to_string().into(),
                reason,
            })?;
            if let Err(reason) = self.adapter.subscribe_route(&desired).await {
                warn!(provider = %key.provider, canonical_type = %key.canonical_type, %reason, "resubscribe failed, rolling back");
                if self.adapter.subscribe_route(&current).await.is_err() {
                    warn!(provider = %key.provider, canonical_type = %key.canonical_type, "rollback subscribe also failed, route left inactive");
                    active.remove(&key);
                }
                return Err(RoutingError::SubscribeRejected {
                    provider: key.provider,
                    canonical_type: desired.canonical_type.to_string().into(),
                    reason,
                });
            }
            active.insert(key, desired);
            return Ok(ReconcileOutcome::Resubscribed);
        }

        let delta = diff(&current.filters, &desired.filters);
        if delta.is_empty() {
            active.insert(key, desired);
            return Ok(ReconcileOutcome::Unchanged);
        }

        for added in &delta.added {
            let mut probe = desired.clone();
            probe.filters = vec![added.clone()];
            self.adapter.subscribe_route(&probe).await.map_err(|reason| RoutingError::SubscribeRejected {
                provider: key.provider.clone(),
                canonical_type: desired.canonical_type.to_string().into(),
                reason,
            })?;
        }
        for removed in &delta.removed {
            let mut probe = current.clone();
            probe.filters = vec![removed.clone()];
            self.adapter.unsubscribe_route(&probe).await.map_err(|reason| RoutingError::UnsubscribeRejected {
                provider: key.provider.clone(),
                canonical_type: desired.canonical_type.to_string().into(),
                reason,
            })?;
        }

        let added = delta.added.len();
        let removed = delta.removed.len();

        // Topics and rest_polls are identical between current and desired here (checked above);
        // an empty update on either still keeps the cached values, never wiping them out.
        let mut merged = desired;
        if merged.topics.is_empty() {
            merged.topics = current.topics.clone();
        }
        if merged.rest_polls.is_empty() {
            merged.rest_polls = current.rest_polls.clone();
        }
        active.insert(key, merged);

        Ok(ReconcileOutcome::FilterDeltaApplied { added, removed })
    }

    /// Removes and unsubscribes the active route for `key`. A key that isn't active is a no-op,
    /// not an error.
    pub async fn deactivate(&self, key: &RouteKey) -> Result<ReconcileOutcome, RoutingError> {
        let mut active = self.active.lock().await;
        let Some(route) = active.remove(key) else {
            return Ok(ReconcileOutcome::Unchanged);
        };
        self.adapter.unsubscribe_route(&route).await.map_err(|reason| RoutingError::UnsubscribeRejected {
            provider: key.provider.clone(),
            canonical_type: key.canonical_type.to_string().into(),
            reason,
        })?;
        info!(provider = %key.provider, canonical_type = %key.canonical_type, "route unsubscribed");
        Ok(ReconcileOutcome::Unsubscribed)
    }

    /// Deep-copy of every currently active route, sorted by `(provider, canonical_type)` for
    /// deterministic iteration.
    pub async fn snapshot(&self) -> Vec<Route> {
        let mut routes: Vec<Route> = self.active.lock().await.values().cloned().collect();
        routes.sort_by(|a, b| (a.provider.as_str(), a.canonical_type).cmp(&(b.provider.as_str(), b.canonical_type)));
        routes
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use meltica_core::EventType;

    use super::*;
    use crate::route::FilterRule;

    #[derive(Default)]
    struct RecordingAdapter {
        subscribe_calls: AtomicUsize,
        unsubscribe_calls: AtomicUsize,
        fail_next_subscribe: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl RouteAdapter for RecordingAdapter {
        async fn subscribe_route(&self, _route: &Route) -> Result<(), String> {
            if self.fail_next_subscribe.swap(false, Ordering::SeqCst) {
                return Err("boom".to_string());
            }
            self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn unsubscribe_route(&self, _route: &Route) -> Result<(), String> {
            self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn route(topics: Vec<&str>, filters: Vec<FilterRule>) -> Route {
        Route::new(EventType::Trade, "binance", topics, vec![], filters)
    }

    #[tokio::test]
    async fn activating_new_route_subscribes() {
        let adapter = Arc::new(RecordingAdapter::default());
        let manager = SubscriptionManager::new(adapter.clone());
        let outcome = manager.activate(route(vec!["trade@btcusdt"], vec![])).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Subscribed);
        assert_eq!(adapter.subscribe_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn activating_equal_route_is_a_noop() {
        let adapter = Arc::new(RecordingAdapter::default());
        let manager = SubscriptionManager::new(adapter.clone());
        let r = route(vec!["trade@btcusdt"], vec![]);
        manager.activate(r.clone()).await.unwrap();
        let outcome = manager.activate(r).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Unchanged);
        assert_eq!(adapter.subscribe_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn activating_route_with_different_topics_resubscribes() {
        let adapter = Arc::new(RecordingAdapter::default());
        let manager = SubscriptionManager::new(adapter.clone());
        manager.activate(route(vec!["trade@btcusdt"], vec![])).await.unwrap();
        let outcome = manager.activate(route(vec!["trade@ethusdt"], vec![])).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Resubscribed);
        assert_eq!(adapter.subscribe_calls.load(Ordering::SeqCst), 2);
        assert_eq!(adapter.unsubscribe_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn activating_route_with_only_filter_changes_applies_delta() {
        let adapter = Arc::new(RecordingAdapter::default());
        let manager = SubscriptionManager::new(adapter.clone());
        manager.activate(route(vec!["trade@btcusdt"], vec![FilterRule::new("instrument", ["BTC"])])).await.unwrap();
        let outcome = manager
            .activate(route(vec!["trade@btcusdt"], vec![FilterRule::new("instrument", ["ETH"])]))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::FilterDeltaApplied { added: 1, removed: 1 });
    }

    #[tokio::test]
    async fn resubscribe_rolls_back_on_subscribe_failure() {
        let adapter = Arc::new(RecordingAdapter::default());
        let manager = SubscriptionManager::new(adapter.clone());
        manager.activate(route(vec!["trade@btcusdt"], vec![])).await.unwrap();
        adapter.fail_next_subscribe.store(true, Ordering::SeqCst);
        let err = manager.activate(route(vec!["trade@ethusdt"], vec![])).await.unwrap_err();
        assert!(matches!(err, RoutingError::SubscribeRejected { .. }));
        let snapshot = manager.snapshot().await;
        assert_eq!(snapshot[0].topics, vec!["trade@btcusdt".to_string()]);
    }

    #[tokio::test]
    async fn deactivate_unknown_route_is_a_noop() {
        let adapter = Arc::new(RecordingAdapter::default());
        let manager = SubscriptionManager::new(adapter.clone());
        let key = route(vec!["trade@btcusdt"], vec![]).key();
        let outcome = manager.deactivate(&key).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Unchanged);
        assert_eq!(adapter.unsubscribe_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn snapshot_is_sorted_by_provider_then_canonical_type() {
        let adapter = Arc::new(RecordingAdapter::default());
        let manager = SubscriptionManager::new(adapter);
        manager.activate(Route::new(EventType::Trade, "okx", vec!["trade"], vec![], vec![])).await.unwrap();
        manager.activate(Route::new(EventType::Trade, "binance", vec!["trade"], vec![], vec![])).await.unwrap();
        manager.activate(Route::new(EventType::Ticker, "binance", vec!["ticker"], vec![], vec![])).await.unwrap();

        let snapshot = manager.snapshot().await;
        let keys: Vec<(&str, EventType)> = snapshot.iter().map(|r| (r.provider.as_str(), r.canonical_type)).collect();
        assert_eq!(keys, vec![("binance", EventType::Trade), ("binance", EventType::Ticker), ("okx", EventType::Trade)]);
    }
}
