use meltica_core::{PoolError, SchemaError};
use thiserror::Error;

/// Errors the bus itself raises. Per-subscriber delivery failures (buffer-full drops) are not
/// errors — they are a documented outcome of [`crate::bus::PublishOutcome`].
#[derive(Debug, Error)]
pub enum BusError {
    #[error(transparent)]
    InvalidEvent(#[from] SchemaError),
    #[error("failed to borrow delivery clones from the pool: {0}")]
    CloneBorrowFailed(#[from] PoolError),
    #[error("bus is closed")]
    Closed,
}
