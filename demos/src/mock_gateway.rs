//! Boots a [`meltica::Gateway`] with a synthetic adapter that emits a handful of trades, then
//! prints whatever a `Trade` subscriber receives. No network access, no credentials — just the
//! wiring between the provider lifecycle manager, the dispatcher runtime, and the bus.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use meltica::{
    EventEnvelope, EventType, Gateway, GatewayConfig, Instance, InstanceFactory, MemoryProviderStore, OrderRequest, Payload,
    ProviderConfig, ProviderSpec, Route,
};
use meltica_core::schema::TradePayload;
use meltica_routing::RouteAdapter;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use smol_str::SmolStr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct MockInstance {
    symbol: SmolStr,
    events_rx: Mutex<Option<mpsc::Receiver<Box<EventEnvelope>>>>,
    events_tx: mpsc::Sender<Box<EventEnvelope>>,
}

#[async_trait]
impl RouteAdapter for MockInstance {
    async fn subscribe_route(&self, route: &Route) -> Result<(), String> {
        tracing::info!(canonical_type = ?route.canonical_type, "mock adapter subscribed");
        Ok(())
    }

    async fn unsubscribe_route(&self, _route: &Route) -> Result<(), String> {
        Ok(())
    }
}

#[async_trait]
impl Instance for MockInstance {
    fn name(&self) -> &str {
        "mock"
    }

    async fn start(&self, ctx: CancellationToken) -> Result<(), String> {
        let tx = self.events_tx.clone();
        let symbol = self.symbol.clone();
        tokio::spawn(async move {
            for i in 0..5u32 {
                if ctx.is_cancelled() {
                    break;
                }
                let payload = TradePayload {
                    trade_id: SmolStr::new(i.to_string()),
                    price: Decimal::new(100_00 + i as i64, 2),
                    quantity: Decimal::ONE,
                    ..Default::default()
                };
                let event = Box::new(EventEnvelope::new(format!("mock-{i}"), "mock", symbol.as_str(), Payload::Trade(payload)));
                if tx.send(event).await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        });
        Ok(())
    }

    async fn submit_order(&self, _req: OrderRequest) -> Result<(), String> {
        Err("mock adapter does not execute orders".into())
    }

    fn instruments(&self) -> Vec<SmolStr> {
        vec![self.symbol.clone()]
    }

    fn take_events(&self) -> Option<mpsc::Receiver<Box<EventEnvelope>>> {
        self.events_rx.lock().take()
    }

    fn take_errors(&self) -> Option<mpsc::Receiver<String>> {
        None
    }
}

struct MockFactory;

#[async_trait]
impl InstanceFactory for MockFactory {
    async fn create(&self, _ctx: CancellationToken, _pools: meltica_core::PoolManager, config: ProviderConfig) -> Result<Arc<dyn Instance>, String> {
        let symbol = config.get_str("symbol").unwrap_or("BTC-USDT").into();
        let (tx, rx) = mpsc::channel(16);
        Ok(Arc::new(MockInstance { symbol, events_tx: tx, events_rx: Mutex::new(Some(rx)) }))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    meltica_core::logging::init_logging();

    let gateway = Gateway::new(GatewayConfig::default(), Arc::new(MemoryProviderStore::new())).await?;
    gateway.register_adapter("mock", Arc::new(MockFactory));

    let ctx = CancellationToken::new();
    let subscription = gateway.subscribe_default(ctx.clone(), EventType::Trade);

    let mut config = std::collections::BTreeMap::new();
    config.insert("symbol".to_string(), serde_json::json!("BTC-USDT"));
    gateway.create_provider(ProviderSpec::new("mock-1", "mock", ProviderConfig::new(config)), true).await?;

    for _ in 0..5 {
        match tokio::time::timeout(Duration::from_secs(1), subscription.recv()).await {
            Ok(Some(event)) => println!("trade: {} @ {:?}", event.symbol, event.payload),
            _ => break,
        }
    }

    gateway.shutdown(Duration::from_millis(200)).await;
    Ok(())
}
