use thiserror::Error;

/// Failure taxonomy surfaced by `fuse` and the backend traits.
///
/// None of these are recovered locally: any one of them aborts the
/// current query evaluation and reaches the caller as-is.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Backend failure: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, Error>;
