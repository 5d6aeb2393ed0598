use thiserror::Error;

use crate::pool::PoolError;
use crate::schema::SchemaError;

/// Aggregated error type for the primitives owned directly by `meltica-core`.
///
/// Downstream crates (bus, outbox, provider, ...) define their own error enums and convert
/// into/from this one only where they genuinely depend on core primitives (pool exhaustion,
/// schema validation) rather than re-exporting it wholesale.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}
