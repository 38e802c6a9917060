//! Error types for the response cache
//!
//! Provides unified error handling using thiserror.

use std::path::PathBuf;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the response cache.
///
/// None of these ever reach an API caller as a failed request: the facade
/// degrades every variant to a cache miss.
#[derive(Error, Debug)]
pub enum CacheError {
    /// A single on-disk record could not be parsed
    #[error("Corrupt cache record: {0}")]
    CorruptRecord(String),

    /// The configured cache location cannot be created or read
    #[error("Cache location unavailable: {}", path.display())]
    CacheUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An item cannot be represented in the record format
    #[error("Cannot cache item: {0}")]
    UnencodableItem(String),

    /// The backing file could not be rewritten
    #[error("Failed to persist cache to {}", path.display())]
    PersistFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CacheError {
    /// Builds a `CorruptRecord` error from any displayable reason.
    pub fn corrupt(reason: impl Into<String>) -> Self {
        CacheError::CorruptRecord(reason.into())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the response cache.
pub type Result<T> = std::result::Result<T, CacheError>;
