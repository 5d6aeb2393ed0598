use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("serialisation failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("bus rejected the event: {0}")]
    Bus(#[from] meltica_bus::BusError),
    #[error("outbox record {0} not found")]
    NotFound(Uuid),
    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
