use chrono::{DateTime, Utc};
use derive_more::Constructor;
use serde::{Deserialize, Serialize};

/// A value paired with the exchange timestamp it was observed at.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize, Constructor)]
pub struct Timed<T> {
    pub value: T,
    pub time: DateTime<Utc>,
}

/// Monotonically increasing counter, used for the routing table version and for
/// provider-sequence bookkeeping where a plain `u64` would lose the "never decreases" intent.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Default)]
pub struct Sequence(u64);

impl Sequence {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Returns the current value then increments, matching the "fetch_add" semantics used
    /// everywhere a version counter is bumped under a lock.
    pub fn fetch_add(&mut self) -> Sequence {
        let current = *self;
        self.0 += 1;
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_add_returns_previous_value_and_increments() {
        let mut seq = Sequence::new(5);
        let observed = seq.fetch_add();
        assert_eq!(observed.value(), 5);
        assert_eq!(seq.value(), 6);
    }
}
