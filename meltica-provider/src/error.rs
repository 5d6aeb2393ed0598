use smol_str::SmolStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider '{0}' already exists")]
    ProviderExists(SmolStr),
    #[error("provider '{0}' not found")]
    ProviderNotFound(SmolStr),
    #[error("provider '{0}' is already running")]
    ProviderRunning(SmolStr),
    #[error("provider '{0}' is starting")]
    ProviderStarting(SmolStr),
    #[error("provider '{0}' is not running")]
    ProviderNotRunning(SmolStr),
    #[error("adapter identifier '{0}' is not registered")]
    UnknownAdapter(SmolStr),
    #[error("adapter factory failed: {0}")]
    Adapter(String),
    #[error(transparent)]
    Routing(#[from] meltica_routing::RoutingError),
    #[error("persistence failure: {0}")]
    Persistence(String),
}
