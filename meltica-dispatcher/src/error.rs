use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("publish rejected: {0}")]
    PublishRejected(String),
}
