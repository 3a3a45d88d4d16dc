//! Unified error types for the query cache layer.
//!
//! Cache-infrastructure variants never reach callers of `QueryCache::run` or
//! `AnswerCache::lookup`; they are logged and converted into a miss there.

use tokio_rusqlite::rusqlite;

/// Unified error types for the cache layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The backing store is unreachable, timed out, or disabled.
    #[error("STORE_UNAVAILABLE: {0}")]
    StoreUnavailable(String),

    /// A value could not be encoded for or decoded from the store.
    #[error("SERIALIZATION_ERROR: {0}")]
    Serialization(String),

    /// An invalidation could not be applied.
    #[error("INVALIDATION_ERROR: {0}")]
    Invalidation(String),

    /// The store does not support the requested operation.
    #[error("UNSUPPORTED: {0}")]
    Unsupported(String),

    /// Invalid input parameters (e.g., confidence outside `[0, 1]`).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),
}

impl Error {
    /// Whether this error means the store should be bypassed for now.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Error::StoreUnavailable(_) | Error::Database(tokio_rusqlite::Error::ConnectionClosed)
        )
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
