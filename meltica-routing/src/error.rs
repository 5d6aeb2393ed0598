use smol_str::SmolStr;
use thiserror::Error;

/// Errors surfaced by the subscription manager while reconciling a route change against a
/// provider adapter.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("provider {provider} rejected subscribe for {canonical_type}: {reason}")]
    SubscribeRejected { provider: SmolStr, canonical_type: SmolStr, reason: String },

    #[error("provider {provider} rejected unsubscribe for {canonical_type}: {reason}")]
    UnsubscribeRejected { provider: SmolStr, canonical_type: SmolStr, reason: String },
}
