//! Per-instrument order-book assembler state (component C6).

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use meltica_core::schema::{BookSnapshotPayload, PriceLevel};
use rust_decimal::Decimal;

use crate::error::BookError;

/// A buffered diff awaiting a reseed, carrying enough of the wire fields to be replayed later.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedDiff {
    pub first_update_id: u64,
    pub final_update_id: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of [`OrderBookHandle::apply_diff`].
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyDiffOutcome {
    /// `finalSeq <= lastSeq`: an idempotent replay, ignored.
    Ignored,
    /// Merged cleanly; carries the updated canonical snapshot.
    Applied(BookSnapshotPayload),
    /// `firstSeq > lastSeq + 1`: the handle has transitioned to unseeded.
    OutOfSync,
}

/// Local order-book state for one instrument: sorted bids and asks indexed by decimal price,
/// the last applied sequence, a seeded flag, a seeding-in-progress flag, and a diff buffer for
/// use while unseeded.
#[derive(Debug, Clone)]
pub struct OrderBookHandle {
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    last_seq: u64,
    seeded: bool,
    seeding_in_progress: bool,
    diff_buffer: VecDeque<BufferedDiff>,
}

impl Default for OrderBookHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderBookHandle {
    pub fn new() -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_seq: 0,
            seeded: false,
            seeding_in_progress: false,
            diff_buffer: VecDeque::new(),
        }
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    pub fn is_seeding_in_progress(&self) -> bool {
        self.seeding_in_progress
    }

    pub fn set_seeding_in_progress(&mut self, value: bool) {
        self.seeding_in_progress = value;
    }

    pub fn buffer_diff(&mut self, diff: BufferedDiff) {
        self.diff_buffer.push_back(diff);
    }

    pub fn take_buffered_diffs(&mut self) -> Vec<BufferedDiff> {
        let mut diffs: Vec<BufferedDiff> = self.diff_buffer.drain(..).collect();
        diffs.sort_by_key(|d| d.final_update_id);
        diffs
    }

    /// Resets to the provided levels and seeds `last_seq`, returning the canonical snapshot.
    pub fn apply_snapshot(&mut self, seq: u64, bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> BookSnapshotPayload {
        self.bids = bids.iter().map(|l| (l.price, l.quantity)).collect();
        self.asks = asks.iter().map(|l| (l.price, l.quantity)).collect();
        self.last_seq = seq;
        self.seeded = true;
        self.seeding_in_progress = false;
        self.diff_buffer.clear();
        self.snapshot(seq, seq)
    }

    /// Applies one diff. Semantics depend on the sequence relationship to `last_seq`: a stale
    /// replay (`final_seq <= last_seq`) is ignored; a gap (`first_seq > last_seq + 1`) flips
    /// the handle to unseeded and resets `last_seq` to zero; otherwise levels are merged
    /// in-place (a zero quantity removes the price) and `last_seq` advances to `final_seq`.
    pub fn apply_diff(
        &mut self,
        first_update_id: u64,
        final_update_id: u64,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
    ) -> Result<ApplyDiffOutcome, BookError> {
        if final_update_id <= self.last_seq {
            return Ok(ApplyDiffOutcome::Ignored);
        }
        if first_update_id > self.last_seq + 1 {
            self.last_seq = 0;
            self.seeded = false;
            return Err(BookError::OutOfSync);
        }

        for level in &bids {
            merge_level(&mut self.bids, level);
        }
        for level in &asks {
            merge_level(&mut self.asks, level);
        }
        self.last_seq = final_update_id;

        Ok(ApplyDiffOutcome::Applied(self.snapshot(first_update_id, final_update_id)))
    }

    fn snapshot(&self, first_update_id: u64, final_update_id: u64) -> BookSnapshotPayload {
        BookSnapshotPayload {
            bids: self.bids.iter().rev().map(|(&price, &quantity)| PriceLevel::new(price, quantity)).collect(),
            asks: self.asks.iter().map(|(&price, &quantity)| PriceLevel::new(price, quantity)).collect(),
            first_update_id,
            final_update_id,
            checksum: None,
            timestamp: Utc::now(),
        }
    }
}

fn merge_level(side: &mut BTreeMap<Decimal, Decimal>, level: &PriceLevel) {
    if level.quantity.is_zero() {
        side.remove(&level.price);
    } else {
        side.insert(level.price, level.quantity);
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn level(price: Decimal, qty: Decimal) -> PriceLevel {
        PriceLevel::new(price, qty)
    }

    #[test]
    fn apply_snapshot_seeds_the_book() {
        let mut book = OrderBookHandle::new();
        let snap = book.apply_snapshot(100, vec![level(dec!(10), dec!(1))], vec![level(dec!(11), dec!(2))]);
        assert!(book.is_seeded());
        assert_eq!(book.last_seq(), 100);
        assert_eq!(snap.bids, vec![level(dec!(10), dec!(1))]);
    }

    #[test]
    fn stale_diff_is_ignored() {
        let mut book = OrderBookHandle::new();
        book.apply_snapshot(100, vec![], vec![]);
        let outcome = book.apply_diff(90, 100, vec![], vec![]).unwrap();
        assert_eq!(outcome, ApplyDiffOutcome::Ignored);
        assert_eq!(book.last_seq(), 100);
    }

    #[test]
    fn gap_triggers_out_of_sync_and_resets_last_seq() {
        let mut book = OrderBookHandle::new();
        book.apply_snapshot(100, vec![], vec![]);
        let err = book.apply_diff(120, 125, vec![], vec![]).unwrap_err();
        assert_eq!(err, BookError::OutOfSync);
        assert_eq!(book.last_seq(), 0);
        assert!(!book.is_seeded());
    }

    #[test]
    fn zero_quantity_removes_price_level() {
        let mut book = OrderBookHandle::new();
        book.apply_snapshot(100, vec![level(dec!(10), dec!(1))], vec![]);
        let outcome = book.apply_diff(101, 101, vec![level(dec!(10), dec!(0))], vec![]).unwrap();
        match outcome {
            ApplyDiffOutcome::Applied(snap) => assert!(snap.bids.is_empty()),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn last_seq_is_monotonic_across_a_sequence_of_applies() {
        let mut book = OrderBookHandle::new();
        book.apply_snapshot(100, vec![], vec![]);
        book.apply_diff(101, 105, vec![], vec![]).unwrap();
        assert_eq!(book.last_seq(), 105);
        assert!(matches!(book.apply_diff(101, 105, vec![], vec![]), Ok(ApplyDiffOutcome::Ignored)));
        assert_eq!(book.last_seq(), 105);
    }
}
