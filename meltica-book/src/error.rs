use thiserror::Error;

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum BookError {
    #[error("diff firstSeq is ahead of lastSeq+1, book is out of sync")]
    OutOfSync,
}
