//! Canonical event envelope and payload variants (component C2).
//!
//! Every value that crosses the [`meltica_bus`](https://docs.rs/meltica-bus) boundary is an
//! [`EventEnvelope`]. Adapters build one per exchange message; the bus clones it once per
//! subscriber and subscribers never see a half-built envelope.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Maximum serialised size, in bytes, of an [`ExtensionPayload`] before the bus rejects it.
///
/// Mirrors the "extension payload size ≤ a configured cap" invariant in the data model; the
/// bus owns the configured value, this is only the library default used when none is supplied.
pub const DEFAULT_EXTENSION_PAYLOAD_CAP: usize = 64 * 1024;

/// The enumerated set of canonical event kinds flowing through the bus.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub enum EventType {
    Trade,
    Ticker,
    BookSnapshot,
    ExecReport,
    KlineSummary,
    InstrumentUpdate,
    BalanceUpdate,
    RiskControl,
    Extension,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trade => "Trade",
            Self::Ticker => "Ticker",
            Self::BookSnapshot => "BookSnapshot",
            Self::ExecReport => "ExecReport",
            Self::KlineSummary => "KlineSummary",
            Self::InstrumentUpdate => "InstrumentUpdate",
            Self::BalanceUpdate => "BalanceUpdate",
            Self::RiskControl => "RiskControl",
            Self::Extension => "Extension",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order side, shared by [`TradePayload`] and [`ExecReportPayload`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Default)]
pub enum Side {
    #[default]
    Buy,
    Sell,
}

/// Order type as reported by the venue on an [`ExecReportPayload`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Default)]
pub enum OrderType {
    #[default]
    Limit,
    Market,
    StopLimit,
    StopMarket,
}

/// Exchange-reported order lifecycle state.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Default)]
pub enum ExecState {
    #[default]
    Ack,
    Partial,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

/// A single price/quantity level in an order book.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct TradePayload {
    pub trade_id: SmolStr,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct TickerPayload {
    pub last: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub volume_24h: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct BookSnapshotPayload {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub first_update_id: u64,
    pub final_update_id: u64,
    pub checksum: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct ExecReportPayload {
    pub client_order_id: SmolStr,
    pub exchange_order_id: Option<SmolStr>,
    pub state: ExecState,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Decimal,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub commission: Decimal,
    pub reject_reason: Option<SmolStr>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct KlineSummaryPayload {
    pub interval: SmolStr,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct InstrumentUpdatePayload {
    pub status: SmolStr,
    pub tick_size: Decimal,
    pub lot_size: Decimal,
    pub min_notional: Decimal,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct BalanceUpdatePayload {
    pub asset: SmolStr,
    pub free: Decimal,
    pub locked: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct RiskControlPayload {
    pub code: SmolStr,
    pub message: SmolStr,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct ExtensionPayload {
    pub kind: SmolStr,
    pub data: serde_json::Value,
}

/// The typed payload union, keyed by [`EventType`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum Payload {
    Trade(TradePayload),
    Ticker(TickerPayload),
    BookSnapshot(BookSnapshotPayload),
    ExecReport(ExecReportPayload),
    KlineSummary(KlineSummaryPayload),
    InstrumentUpdate(InstrumentUpdatePayload),
    BalanceUpdate(BalanceUpdatePayload),
    RiskControl(RiskControlPayload),
    Extension(ExtensionPayload),
}

impl Payload {
    /// The [`EventType`] this payload variant corresponds to.
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Trade(_) => EventType::Trade,
            Self::Ticker(_) => EventType::Ticker,
            Self::BookSnapshot(_) => EventType::BookSnapshot,
            Self::ExecReport(_) => EventType::ExecReport,
            Self::KlineSummary(_) => EventType::KlineSummary,
            Self::InstrumentUpdate(_) => EventType::InstrumentUpdate,
            Self::BalanceUpdate(_) => EventType::BalanceUpdate,
            Self::RiskControl(_) => EventType::RiskControl,
            Self::Extension(_) => EventType::Extension,
        }
    }

    /// Zeroes the payload in place, preserving the active variant.
    ///
    /// Used by the pool on [`Event::reset`] so a recycled envelope never leaks a previous
    /// subscriber's data through a stale clone.
    fn zero(&mut self) {
        match self {
            Self::Trade(p) => *p = TradePayload::default(),
            Self::Ticker(p) => *p = TickerPayload::default(),
            Self::BookSnapshot(p) => *p = BookSnapshotPayload::default(),
            Self::ExecReport(p) => *p = ExecReportPayload::default(),
            Self::KlineSummary(p) => *p = KlineSummaryPayload::default(),
            Self::InstrumentUpdate(p) => *p = InstrumentUpdatePayload::default(),
            Self::BalanceUpdate(p) => *p = BalanceUpdatePayload::default(),
            Self::RiskControl(p) => *p = RiskControlPayload::default(),
            Self::Extension(p) => *p = ExtensionPayload::default(),
        }
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::Extension(ExtensionPayload::default())
    }
}

/// Error returned when an [`EventEnvelope`] fails validation.
///
/// There is no `EmptyEventType` variant: [`EventType`] is a closed enum with no empty
/// representation, so that invariant holds structurally and needs no runtime check.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("symbol must not be empty")]
    EmptySymbol,
    #[error("extension payload of {actual} bytes exceeds cap of {cap} bytes")]
    ExtensionPayloadTooLarge { actual: usize, cap: usize },
    #[error("payload variant {payload:?} does not match declared event_type {declared}")]
    PayloadTypeMismatch { declared: EventType, payload: EventType },
}

/// The canonical event envelope — the unit of work that flows through the bus.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EventEnvelope {
    /// Unique identifier within the dedup window (component C10 keys on this).
    pub id: SmolStr,
    pub provider: SmolStr,
    /// Upper-case normalised instrument symbol.
    pub symbol: SmolStr,
    pub event_type: EventType,
    pub emit_time: DateTime<Utc>,
    /// Monotonic per (provider, symbol, event_type), assigned by the adapter.
    pub provider_seq: u64,
    /// Routing table version stamped by the dispatcher at publish time.
    pub routing_version: u64,
    pub payload: Payload,
}

impl EventEnvelope {
    pub fn new(
        id: impl Into<SmolStr>,
        provider: impl Into<SmolStr>,
        symbol: impl Into<SmolStr>,
        payload: Payload,
    ) -> Self {
        let event_type = payload.event_type();
        Self {
            id: id.into(),
            provider: provider.into(),
            symbol: symbol.into().to_uppercase().into(),
            event_type,
            emit_time: Utc::now(),
            provider_seq: 0,
            routing_version: 0,
            payload,
        }
    }

    /// Validates the invariants in the data model: non-empty type/symbol, extension cap, and
    /// payload/event_type agreement.
    pub fn validate(&self, extension_cap: usize) -> Result<(), SchemaError> {
        if self.symbol.is_empty() {
            return Err(SchemaError::EmptySymbol);
        }
        let payload_type = self.payload.event_type();
        if payload_type != self.event_type {
            return Err(SchemaError::PayloadTypeMismatch {
                declared: self.event_type,
                payload: payload_type,
            });
        }
        if let Payload::Extension(ext) = &self.payload {
            let size = serde_json::to_vec(&ext.data).map(|v| v.len()).unwrap_or(usize::MAX);
            if size > extension_cap {
                return Err(SchemaError::ExtensionPayloadTooLarge { actual: size, cap: extension_cap });
            }
        }
        Ok(())
    }

    /// Resets this envelope to a zeroed, reusable state for the object pool.
    pub fn reset(&mut self) {
        self.id = SmolStr::default();
        self.provider = SmolStr::default();
        self.symbol = SmolStr::default();
        self.provider_seq = 0;
        self.routing_version = 0;
        self.payload.zero();
    }
}

impl Default for EventEnvelope {
    fn default() -> Self {
        Self {
            id: SmolStr::default(),
            provider: SmolStr::default(),
            symbol: SmolStr::default(),
            event_type: EventType::Extension,
            emit_time: DateTime::<Utc>::UNIX_EPOCH,
            provider_seq: 0,
            routing_version: 0,
            payload: Payload::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade_event() -> EventEnvelope {
        EventEnvelope::new(
            "e1",
            "binance",
            "btc-usdt",
            Payload::Trade(TradePayload {
                trade_id: "t1".into(),
                side: Side::Buy,
                price: Decimal::new(100, 0),
                quantity: Decimal::new(1, 0),
                timestamp: Utc::now(),
            }),
        )
    }

    #[test]
    fn symbol_is_upper_cased_on_construction() {
        let event = trade_event();
        assert_eq!(event.symbol.as_str(), "BTC-USDT");
    }

    #[test]
    fn validate_rejects_empty_symbol() {
        let mut event = trade_event();
        event.symbol = SmolStr::default();
        assert_eq!(event.validate(DEFAULT_EXTENSION_PAYLOAD_CAP), Err(SchemaError::EmptySymbol));
    }

    #[test]
    fn validate_rejects_oversized_extension_payload() {
        let big = serde_json::json!({ "blob": "x".repeat(128) });
        let event = EventEnvelope::new(
            "e2",
            "binance",
            "ETH-USDT",
            Payload::Extension(ExtensionPayload { kind: "custom".into(), data: big }),
        );
        assert!(event.validate(16).is_err());
    }

    #[test]
    fn reset_zeroes_payload_but_keeps_variant() {
        let mut event = trade_event();
        event.reset();
        assert_eq!(event.id.as_str(), "");
        match event.payload {
            Payload::Trade(p) => assert_eq!(p, TradePayload::default()),
            _ => panic!("variant changed across reset"),
        }
    }

    #[test]
    fn validate_rejects_payload_type_mismatch() {
        let mut event = trade_event();
        event.event_type = EventType::Ticker;
        assert!(matches!(
            event.validate(DEFAULT_EXTENSION_PAYLOAD_CAP),
            Err(SchemaError::PayloadTypeMismatch { .. })
        ));
    }
}
