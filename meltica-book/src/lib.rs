#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    clippy::unused_self,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments)]

//! Snapshot-then-diff order book assembler with sequence invariants (component C6).

pub mod error;
pub mod handle;
pub mod manager;
pub mod replay;

pub use error::BookError;
pub use handle::{ApplyDiffOutcome, BufferedDiff, OrderBookHandle};
pub use manager::BookManager;
pub use replay::{replay_sequence, SnapshotSource};
