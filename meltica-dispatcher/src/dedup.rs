//! Event-id dedup window (component C10), opportunistically garbage collected rather than
//! timer-driven: a background sweep task would be one more thing to cancel correctly, and the
//! map only ever grows from calls already on the hot path.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use smol_str::SmolStr;
use tokio::time::Instant;

/// Tracks event ids seen within the last `ttl`. Entries older than `ttl` are swept the next
/// time the map exceeds `gc_threshold`, so steady-state memory stays bounded without a
/// dedicated timer.
pub struct DedupMap {
    ttl: Duration,
    gc_threshold: usize,
    seen: Mutex<HashMap<SmolStr, Instant>>,
}

impl std::fmt::Debug for DedupMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupMap").field("ttl", &self.ttl).field("tracked", &self.seen.lock().len()).finish()
    }
}

impl DedupMap {
    pub fn new(ttl: Duration, gc_threshold: usize) -> Self {
        Self { ttl, gc_threshold, seen: Mutex::new(HashMap::new()) }
    }

    /// Five-minute TTL dedup window, matching the default the gateway has always used.
    pub fn with_default_ttl(gc_threshold: usize) -> Self {
        Self::new(Duration::from_secs(5 * 60), gc_threshold)
    }

    /// Returns `true` if `id` was already seen within the TTL (a duplicate); otherwise records
    /// it as seen and returns `false`.
    pub fn check_and_insert(&self, id: &str) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock();

        if seen.len() > self.gc_threshold {
            seen.retain(|_, seen_at| now.duration_since(*seen_at) < self.ttl);
        }

        if let Some(seen_at) = seen.get(id) {
            if now.duration_since(*seen_at) < self.ttl {
                return true;
            }
        }
        seen.insert(SmolStr::new(id), now);
        false
    }
}
