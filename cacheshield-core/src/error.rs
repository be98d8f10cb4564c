//! Error types for cacheshield operations

use std::time::Duration;
use thiserror::Error;

/// Key-value store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable during {operation} on {key}: {reason}")]
    Unavailable {
        operation: &'static str,
        key: String,
        reason: String,
    },
}

/// Envelope encoding and decoding errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Failed to encode entry for {key}: {reason}")]
    Encode { key: String, reason: String },

    #[error("Malformed cache entry at {key}: {reason}")]
    Decode { key: String, reason: String },
}

/// Failure reported by the backing data source.
///
/// Confirmed absence is not a failure; loaders return `Ok(None)` for that.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct LoaderError {
    pub reason: String,
}

impl LoaderError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Wrap any error raised by the source.
    pub fn from_error<E: std::error::Error>(err: E) -> Self {
        Self::new(err.to_string())
    }
}

/// Advisory lock errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("Timed out after {waited:?} waiting for {key} ({attempts} attempts)")]
    Timeout {
        key: String,
        waited: Duration,
        attempts: u32,
    },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Key prefix {first:?} collides with {second:?}")]
    PrefixCollision { first: String, second: String },
}

/// Master error type for all cacheshield errors.
#[derive(Debug, Clone, Error)]
pub enum CacheShieldError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Codec(#[from] CodecError),

    #[error("Loader failed for {key}: {source}")]
    Loader {
        key: String,
        #[source]
        source: LoaderError,
    },

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl CacheShieldError {
    /// Attach the cache key a loader failure happened for.
    pub fn loader(key: impl Into<String>, source: LoaderError) -> Self {
        Self::Loader {
            key: key.into(),
            source,
        }
    }

    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::Lock(LockError::Timeout { .. }))
    }

    pub fn is_loader_failure(&self) -> bool {
        matches!(self, Self::Loader { .. })
    }

    pub fn is_serialization_failure(&self) -> bool {
        matches!(self, Self::Codec(_))
    }

    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::Store(StoreError::Unavailable { .. }))
    }
}

/// Result type alias for cacheshield operations.
pub type CacheShieldResult<T> = Result<T, CacheShieldError>;

// =============================================================================
// TESTS
// =============================================================================
