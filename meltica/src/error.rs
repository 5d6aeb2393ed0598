use thiserror::Error;

/// Aggregated error type for callers wiring the gateway end to end. Individual crates keep
/// their own taxonomy per component; this only exists at the facade boundary where a caller
/// genuinely needs one type to match on.
#[derive(Debug, Error)]
pub enum MelticaError {
    #[error(transparent)]
    Pool(#[from] meltica_core::PoolError),
    #[error(transparent)]
    Bus(#[from] meltica_bus::BusError),
    #[error(transparent)]
    Outbox(#[from] meltica_outbox::OutboxError),
    #[error(transparent)]
    Book(#[from] meltica_book::BookError),
    #[error(transparent)]
    Stream(#[from] meltica_stream::StreamError),
    #[error(transparent)]
    Routing(#[from] meltica_routing::RoutingError),
    #[error(transparent)]
    Provider(#[from] meltica_provider::ProviderError),
}
