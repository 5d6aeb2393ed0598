//! REST depth-snapshot fetch for the order-book reseed driver.

use async_trait::async_trait;
use meltica_core::schema::PriceLevel;
use meltica_book::SnapshotSource;
use serde::Deserialize;

use super::wire::BinanceLevel;
use super::DEPTH_SNAPSHOT_URL;

#[derive(Debug, Deserialize)]
struct DepthSnapshot {
    #[serde(rename = "lastUpdateId")]
    last_update_id: u64,
    bids: Vec<BinanceLevel>,
    asks: Vec<BinanceLevel>,
}

/// Fetches a Binance Spot depth snapshot over REST, ignoring `min_update_id`: Binance has no
/// way to request a snapshot covering a specific update id, so the reseed driver is expected to
/// re-fetch and re-check coverage itself if the returned snapshot still doesn't reach far
/// enough.
pub struct BinanceSnapshotSource {
    client: reqwest::Client,
    symbol: String,
    depth_limit: u32,
}

impl BinanceSnapshotSource {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), symbol: symbol.into(), depth_limit: 1000 }
    }
}

#[async_trait]
impl SnapshotSource for BinanceSnapshotSource {
    async fn fetch_snapshot(&self, _min_update_id: u64) -> Result<(u64, Vec<PriceLevel>, Vec<PriceLevel>), String> {
        let url = format!("{DEPTH_SNAPSHOT_URL}?symbol={}&limit={}", self.symbol.to_ascii_uppercase(), self.depth_limit);
        let snapshot = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| err.to_string())?
            .json::<DepthSnapshot>()
            .await
            .map_err(|err| err.to_string())?;

        let bids = snapshot.bids.iter().map(|level| PriceLevel::new(level.price(), level.quantity())).collect();
        let asks = snapshot.asks.iter().map(|level| PriceLevel::new(level.price(), level.quantity())).collect();
        Ok((snapshot.last_update_id, bids, asks))
    }
}
