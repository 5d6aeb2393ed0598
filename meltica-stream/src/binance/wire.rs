//! Binance combined-stream payload shapes. Field names follow Binance's single-letter JSON
//! keys, matched with `#[serde(rename)]` the same way the venue adapters in this workspace tag
//! every other exchange's wire events.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A `[price, quantity]` pair as Binance serialises both book levels and trade fills.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BinanceLevel(pub Decimal, pub Decimal);

impl BinanceLevel {
    pub fn price(&self) -> Decimal {
        self.0
    }

    pub fn quantity(&self) -> Decimal {
        self.1
    }
}

/// Tagged union over the combined-stream event types this adapter consumes. Binance
/// discriminates on the `e` field.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "e")]
pub enum BinanceWebSocketEvent {
    #[serde(rename = "trade")]
    Trade(BinanceTrade),
    #[serde(rename = "depthUpdate")]
    DepthUpdate(BinanceDepthUpdate),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BinanceTrade {
    #[serde(rename = "E")]
    pub event_time: u64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "t")]
    pub trade_id: u64,
    #[serde(rename = "p")]
    pub price: Decimal,
    #[serde(rename = "q")]
    pub quantity: Decimal,
    #[serde(rename = "m")]
    pub buyer_is_maker: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BinanceDepthUpdate {
    #[serde(rename = "E")]
    pub event_time: u64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "U")]
    pub first_update_id: u64,
    #[serde(rename = "u")]
    pub final_update_id: u64,
    #[serde(rename = "b")]
    pub bids: Vec<BinanceLevel>,
    #[serde(rename = "a")]
    pub asks: Vec<BinanceLevel>,
}

/// Binance wraps every combined-stream payload in a `{"stream": ..., "data": ...}` envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct CombinedStreamEnvelope<T> {
    pub stream: String,
    pub data: T,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_update_deserialises_from_single_letter_keys() {
        let text = r#"{"e":"depthUpdate","E":123,"s":"BTCUSDT","U":10,"u":15,"b":[["100.0","1.5"]],"a":[]}"#;
        let event: BinanceWebSocketEvent = serde_json::from_str(text).unwrap();
        match event {
            BinanceWebSocketEvent::DepthUpdate(update) => {
                assert_eq!(update.first_update_id, 10);
                assert_eq!(update.final_update_id, 15);
                assert_eq!(update.bids[0].price(), Decimal::new(1000, 1));
            }
            other => panic!("expected depth update, got {other:?}"),
        }
    }

    #[test]
    fn trade_deserialises_from_single_letter_keys() {
        let text = r#"{"e":"trade","E":123,"s":"BTCUSDT","t":99,"p":"100.5","q":"0.2","m":true}"#;
        let event: BinanceWebSocketEvent = serde_json::from_str(text).unwrap();
        assert!(matches!(event, BinanceWebSocketEvent::Trade(_)));
    }

    #[test]
    fn combined_stream_envelope_unwraps_the_data_field() {
        let text = r#"{"stream":"btcusdt@trade","data":{"e":"trade","E":1,"s":"BTCUSDT","t":1,"p":"1","q":"1","m":false}}"#;
        let envelope: CombinedStreamEnvelope<BinanceWebSocketEvent> = serde_json::from_str(text).unwrap();
        assert_eq!(envelope.stream, "btcusdt@trade");
    }
}
