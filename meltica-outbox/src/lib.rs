#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    clippy::unused_self,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments)]

//! Pre-publish persistence and background replay wrapper around [`meltica_bus`] (component C5).

pub mod durable;
pub mod error;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod record;
pub mod store;

pub use durable::DurableBus;
pub use error::OutboxError;
#[cfg(feature = "postgres")]
pub use postgres::PgOutboxStore;
pub use record::{OutboxHeaders, OutboxRecord};
pub use store::{MemoryOutboxStore, OutboxStore};
