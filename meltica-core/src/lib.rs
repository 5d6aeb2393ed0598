#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    clippy::unused_self,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments)]

//! Canonical schema, object pool, and shared runtime primitives for the Meltica gateway.
//!
//! This crate is the leaf of the workspace: every other `meltica-*` crate depends on it for
//! the [`schema::EventEnvelope`] type that flows end to end, and for the [`pool::PoolManager`]
//! that bounds how many of them exist in memory at once.

pub mod error;
pub mod logging;
pub mod pool;
pub mod schema;
pub mod shutdown;
pub mod timed;

pub use error::CoreError;
pub use pool::{PoolError, PoolManager, Poolable};
pub use schema::{EventEnvelope, EventType, Payload, SchemaError};
pub use timed::{Sequence, Timed};
