//! Decouples the dispatcher from a concrete bus implementation, so it can publish through
//! either a plain [`meltica_bus::EventBus`] or the durability wrapper without a crate
//! dependency on [`meltica_outbox`](https://docs.rs/meltica-outbox).

use async_trait::async_trait;
use meltica_core::EventEnvelope;
use tokio_util::sync::CancellationToken;

/// Anything the dispatcher can hand a stamped, deduplicated event to.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, ctx: &CancellationToken, event: Box<EventEnvelope>) -> Result<(), String>;
}

#[async_trait]
impl Publisher for meltica_bus::EventBus {
    async fn publish(&self, ctx: &CancellationToken, event: Box<EventEnvelope>) -> Result<(), String> {
        meltica_bus::EventBus::publish(self, ctx, event).await.map(|_| ()).map_err(|err| err.to_string())
    }
}
