//! Cache error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(#[from] envy::Error),

    /// Two key factories claimed the same root segment
    #[error("Key root '{root}' already owned by entity '{owner}'")]
    RootConflict { root: String, owner: String },

    #[error("No key factory registered for entity '{0}'")]
    UnknownEntity(String),

    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Refetch callback failed; the key stays stale
    #[error("Refetch failed for {key}: {reason}")]
    RefetchFailed { key: String, reason: String },
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Outcome of a failed optimistic mutation
#[derive(Error, Debug)]
pub enum MutationError<E> {
    /// Backend rejected the mutation; the cache was rolled back
    #[error("Backend mutation failed: {0}")]
    Backend(E),

    #[error(transparent)]
    Cache(#[from] CacheError),
}
