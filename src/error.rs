//! Error types for the entity cache.

use std::fmt;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the entity cache.
///
/// Errors are `Clone` because a single backend read is shared between every
/// caller waiting on the same key: each of them receives the same outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The requested row does not exist in storage.
    ///
    /// This is the expected outcome of "does this exist" checks and upsert
    /// flows. It is never cached, so a later insert is always observed.
    NotFound,

    /// Storage backend failure (anything other than "no rows").
    ///
    /// Carries entity/key context once it crosses the cache boundary.
    /// Corrupted cache entries are also reported through this variant after
    /// the offending entry has been evicted.
    StorageError(String),

    /// An invalidation listener failed or panicked.
    ///
    /// Listener failures are isolated: the primary removal has already
    /// completed when this is reported.
    ListenerError(String),

    /// The request deadline elapsed while waiting on storage or on another
    /// caller's in-flight load.
    Timeout(String),

    /// Serialization failed when converting an entity to cache bytes.
    SerializationError(String),

    /// Deserialization failed when converting cache bytes to an entity.
    DeserializationError(String),

    /// Cache envelope header is invalid (bad magic or wrong entity prefix).
    InvalidCacheEntry(String),

    /// Schema version mismatch between code and cached data.
    VersionMismatch {
        /// Expected schema version (from compiled code)
        expected: u32,
        /// Found schema version (from cached entry)
        found: u32,
    },

    /// Entity validation failed.
    ValidationError(String),

    /// Invalid cache configuration.
    ConfigError(String),

    /// Generic error with custom message.
    Other(String),
}

impl Error {
    /// Whether this is the distinguished "no rows" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }

    /// Whether the cached bytes for an entry could not be decoded.
    pub fn is_corrupt_entry(&self) -> bool {
        matches!(
            self,
            Error::DeserializationError(_)
                | Error::InvalidCacheEntry(_)
                | Error::VersionMismatch { .. }
        )
    }

    /// Attach `entity[key]` context to a backend failure.
    ///
    /// `NotFound` passes through untouched so callers can keep testing for it.
    pub fn with_context(self, entity: &str, key: &dyn fmt::Display) -> Self {
        match self {
            Error::NotFound => Error::NotFound,
            Error::StorageError(msg) => Error::StorageError(format!("{entity}[{key}]: {msg}")),
            Error::Timeout(msg) => Error::Timeout(format!("{entity}[{key}]: {msg}")),
            Error::Other(msg) => Error::StorageError(format!("{entity}[{key}]: {msg}")),
            e if e.is_corrupt_entry() => {
                Error::StorageError(format!("{entity}[{key}]: corrupt cache entry: {e}"))
            }
            e => e,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound => write!(f, "Not found"),
            Error::StorageError(msg) => write!(f, "Storage error: {}", msg),
            Error::ListenerError(msg) => write!(f, "Invalidation listener error: {}", msg),
            Error::Timeout(msg) => write!(f, "Timeout: {}", msg),
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Error::InvalidCacheEntry(msg) => write!(f, "Invalid cache entry: {}", msg),
            Error::VersionMismatch { expected, found } => {
                write!(
                    f,
                    "Cache version mismatch: expected {}, found {}",
                    expected, found
                )
            }
            Error::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::ConfigError(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Error::Timeout(e.to_string())
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}
