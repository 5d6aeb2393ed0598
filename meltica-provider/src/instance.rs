//! The adapter boundary (component C11): the core never owns adapter internals, only this
//! trait object and the channels an instance is constructed with.

use std::sync::Arc;

use async_trait::async_trait;
use meltica_core::schema::{OrderType, Side};
use meltica_core::{EventEnvelope, PoolManager};
use meltica_routing::RouteAdapter;
use rust_decimal::Decimal;
use smol_str::SmolStr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ProviderConfig;

/// An order submission request routed to a provider's live adapter.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub client_order_id: SmolStr,
    pub symbol: SmolStr,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Decimal,
    pub quantity: Decimal,
}

/// A running (or startable) venue connection. `RouteAdapter` is a supertrait so the same
/// handle doubles as the adapter a [`meltica_routing::SubscriptionManager`] pushes route
/// changes to.
#[async_trait]
pub trait Instance: RouteAdapter + Send + Sync {
    fn name(&self) -> &str;

    /// Dials the venue and begins streaming into the channels later retrieved through
    /// [`Self::take_events`]/[`Self::take_errors`].
    async fn start(&self, ctx: CancellationToken) -> Result<(), String>;

    async fn submit_order(&self, req: OrderRequest) -> Result<(), String>;

    fn instruments(&self) -> Vec<SmolStr>;

    /// Hands over the receiving end of this instance's pooled-event channel. Returns `None`
    /// once already taken; the lifecycle manager calls this exactly once per `start`.
    fn take_events(&self) -> Option<mpsc::Receiver<Box<EventEnvelope>>>;

    /// Hands over the receiving end of this instance's transport-error channel, same
    /// take-once semantics as [`Self::take_events`].
    fn take_errors(&self) -> Option<mpsc::Receiver<String>>;
}

/// A factory `(ctx, pools, config) -> Instance`, registered under an adapter identifier.
#[async_trait]
pub trait InstanceFactory: Send + Sync {
    async fn create(
        &self,
        ctx: CancellationToken,
        pools: PoolManager,
        config: ProviderConfig,
    ) -> Result<Arc<dyn Instance>, String>;
}
