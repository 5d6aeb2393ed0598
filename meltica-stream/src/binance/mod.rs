//! Binance Spot wire adapter: combined-stream event shapes, REST depth-snapshot fetch for the
//! order-book reseed driver, and request signing for authenticated REST calls.

mod signing;
mod snapshot;
mod wire;

pub use signing::sign_query;
pub use snapshot::BinanceSnapshotSource;
pub use wire::{BinanceDepthUpdate, BinanceLevel, BinanceTrade, BinanceWebSocketEvent, CombinedStreamEnvelope};

/// Combined-stream WebSocket base for Binance Spot.
pub const COMBINED_STREAM_BASE_URL: &str = "wss://stream.binance.com:9443/stream";

/// REST depth-snapshot endpoint for Binance Spot.
pub const DEPTH_SNAPSHOT_URL: &str = "https://api.binance.com/api/v3/depth";

/// Stream name for a symbol's trade feed, as accepted by SUBSCRIBE/UNSUBSCRIBE frames.
pub fn trade_stream(symbol: &str) -> String {
    format!("{}@trade", symbol.to_ascii_lowercase())
}

/// Stream name for a symbol's diff-depth feed at the given update interval in milliseconds.
pub fn depth_stream(symbol: &str, update_interval_ms: u32) -> String {
    format!("{}@depth@{update_interval_ms}ms", symbol.to_ascii_lowercase())
}
