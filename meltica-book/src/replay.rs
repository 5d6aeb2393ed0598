//! Reseed driver (component C6 "ReplaySequence"): owned conceptually by the venue adapter, but
//! specified here because the buffering/out-of-sync invariants are the order book's, not the
//! transport's.

use async_trait::async_trait;
use meltica_core::schema::PriceLevel;
use tracing::warn;

use crate::handle::{ApplyDiffOutcome, BufferedDiff, OrderBookHandle};

/// The REST depth-snapshot fetch the driver needs from the adapter. Implementors return a
/// snapshot whose `lastUpdateId` is at least `min_update_id`.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self, min_update_id: u64) -> Result<(u64, Vec<PriceLevel>, Vec<PriceLevel>), String>;
}

/// Drains `handle`'s buffered diffs by fetching a fresh snapshot and replaying whatever
/// survives it, re-queueing and re-fetching on an out-of-sync diff, exiting once the buffer is
/// empty.
pub async fn replay_sequence(handle: &mut OrderBookHandle, source: &dyn SnapshotSource) -> Result<(), String> {
    handle.set_seeding_in_progress(true);

    loop {
        let mut pending = handle.take_buffered_diffs();
        let min_update_id = pending.first().map(|d| d.first_update_id).unwrap_or(0);

        let (snapshot_seq, bids, asks) = source.fetch_snapshot(min_update_id).await?;
        handle.apply_snapshot(snapshot_seq, bids, asks);

        pending.sort_by_key(|d| d.final_update_id);
        pending.retain(|d| d.final_update_id > snapshot_seq);

        let mut requeue: Vec<BufferedDiff> = Vec::new();
        for diff in pending {
            if !requeue.is_empty() {
                requeue.push(diff);
                continue;
            }
            match handle.apply_diff(diff.first_update_id, diff.final_update_id, diff.bids.clone(), diff.asks.clone()) {
                Ok(ApplyDiffOutcome::Ignored) | Ok(ApplyDiffOutcome::Applied(_)) => {}
                Ok(ApplyDiffOutcome::OutOfSync) => unreachable!("apply_diff reports OutOfSync via Err"),
                Err(_) => {
                    warn!("buffered diff raised out-of-sync mid-drain, re-queueing and reseeding");
                    requeue.push(diff);
                }
            }
        }

        if requeue.is_empty() {
            handle.set_seeding_in_progress(false);
            return Ok(());
        }
        for diff in requeue {
            handle.buffer_diff(diff);
        }
    }
}
