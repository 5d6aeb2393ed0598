#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    clippy::unused_self,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments)]

//! Typed pub/sub event bus with bounded per-subscriber queues (component C4).

pub mod bus;
pub mod error;
pub mod subscriber;

pub use bus::{EventBus, PublishOutcome, DEFAULT_EXTENSION_CAP};
pub use error::BusError;
pub use subscriber::{Subscription, SubscriptionId};
