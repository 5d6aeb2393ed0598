//! Registry of per-instrument [`OrderBookHandle`]s, keyed by symbol.

use std::sync::Arc;

use fnv::FnvHashMap;
use meltica_core::schema::{BookSnapshotPayload, PriceLevel};
use parking_lot::RwLock;
use smol_str::SmolStr;

use crate::error::BookError;
use crate::handle::{ApplyDiffOutcome, OrderBookHandle};

/// Maintains a set of local order books, one per instrument symbol, applying snapshots and
/// diffs as they arrive from a venue stream.
#[derive(Debug, Default)]
pub struct BookManager {
    books: RwLock<FnvHashMap<SmolStr, Arc<RwLock<OrderBookHandle>>>>,
}

impl BookManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle_for(&self, symbol: &str) -> Arc<RwLock<OrderBookHandle>> {
        if let Some(handle) = self.books.read().get(symbol) {
            return handle.clone();
        }
        self.books.write().entry(SmolStr::new(symbol)).or_insert_with(|| Arc::new(RwLock::new(OrderBookHandle::new()))).clone()
    }

    /// Shared handle for `symbol`, created empty if this is the first time it's been seen.
    /// Exposed so a venue adapter can drive [`crate::replay::replay_sequence`] directly when a
    /// gap is detected, without the manager needing to own the REST snapshot fetch itself.
    pub fn handle(&self, symbol: &str) -> Arc<RwLock<OrderBookHandle>> {
        self.handle_for(symbol)
    }

    pub fn apply_snapshot(&self, symbol: &str, seq: u64, bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> BookSnapshotPayload {
        self.handle_for(symbol).write().apply_snapshot(seq, bids, asks)
    }

    pub fn apply_diff(
        &self,
        symbol: &str,
        first_update_id: u64,
        final_update_id: u64,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
    ) -> Result<ApplyDiffOutcome, BookError> {
        self.handle_for(symbol).write().apply_diff(first_update_id, final_update_id, bids, asks)
    }

    /// Whether `symbol` currently has a seeded book.
    pub fn is_seeded(&self, symbol: &str) -> bool {
        self.books.read().get(symbol).is_some_and(|h| h.read().is_seeded())
    }

    pub fn remove(&self, symbol: &str) {
        self.books.write().remove(symbol);
    }
}
