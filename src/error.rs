//! Error types for cache and loading operations
//!
//! Load results are never errors here: a transport failure is an ordinary
//! cache value the caller encodes. The variants below only cover misuse of
//! the public API and configuration problems.

use thiserror::Error;

/// Main error type for the request cache
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// An argument passed to a public operation is not acceptable
    #[error("Invalid argument `{argument}`: {reason}")]
    InvalidArgument {
        argument: &'static str,
        reason: String,
    },

    /// The operation requires the key to be cached
    #[error("Cache key not found: {key}")]
    NotFound { key: String },

    /// The load's work panicked before settling, so it has no outcome
    #[error("Load for `{key}` was aborted before its work settled")]
    LoadAborted { key: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl CacheError {
    pub(crate) fn invalid_argument(argument: &'static str, reason: impl Into<String>) -> Self {
        CacheError::InvalidArgument {
            argument,
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}
