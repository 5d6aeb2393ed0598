#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    clippy::unused_self,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments)]

//! Dispatcher runtime for the Meltica gateway (component C10): stamps, deduplicates, and
//! forwards pooled events from adapters to the bus.

mod dedup;
mod error;
mod errors;
mod publisher;
mod runtime;

pub use dedup::DedupMap;
pub use error::DispatchError;
pub use errors::ErrorChannel;
pub use publisher::Publisher;
pub use runtime::{DispatchStats, DispatcherRuntime};
