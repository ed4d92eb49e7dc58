//! Postcard-based cache serialization with versioned envelopes.
//!
//! Entries are kept in memory as encoded bytes rather than live values, so a
//! hit always hands the caller its own copy and hydrated relations (which are
//! `#[serde(skip)]`) can never leak into the cache.
//!
//! # Format
//!
//! ```text
//! ┌─────────────────┬─────────────────┬──────────────────┬──────────────────────────┐
//! │  MAGIC (4 bytes)│VERSION (varint) │ ENTITY (str)     │POSTCARD PAYLOAD (N bytes)│
//! └─────────────────┴─────────────────┴──────────────────┴──────────────────────────┘
//!   "KCHE"              u32               cache prefix      postcard::to_allocvec(T)
//! ```
//!
//! The entity prefix makes it impossible to decode one entity type's bytes as
//! another, even if their postcard layouts happen to line up.
//!
//! # Example
//!
//! ```rust
//! use keyed_cache::serialization::{serialize_for_cache, deserialize_from_cache};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Note {
//!     id: u64,
//!     text: String,
//! }
//!
//! # fn main() -> keyed_cache::Result<()> {
//! let note = Note { id: 1, text: "hello".to_string() };
//! let bytes = serialize_for_cache("note", &note)?;
//! let decoded: Note = deserialize_from_cache("note", &bytes)?;
//! assert_eq!(note, decoded);
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Magic header for cache entries: b"KCHE"
pub const CACHE_MAGIC: [u8; 4] = *b"KCHE";

/// Current schema version.
///
/// Increment when a cached model changes shape (fields added, removed,
/// reordered or retyped). Entries written under another version are
/// rejected and evicted on their next lookup.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Versioned envelope for cache entries.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheEnvelope<'a, T> {
    /// Magic header: must be b"KCHE"
    pub magic: [u8; 4],
    /// Schema version: must match CURRENT_SCHEMA_VERSION
    pub version: u32,
    /// Cache prefix of the entity type that wrote this entry
    pub entity: &'a str,
    /// The actual cached data
    pub payload: T,
}

impl<'a, T> CacheEnvelope<'a, T> {
    /// Create a new envelope with current magic and version.
    pub fn new(entity: &'a str, payload: T) -> Self {
        Self {
            magic: CACHE_MAGIC,
            version: CURRENT_SCHEMA_VERSION,
            entity,
            payload,
        }
    }
}

/// Serialize a value with envelope for cache storage.
///
/// # Errors
///
/// Returns `Error::SerializationError` if Postcard serialization fails.
pub fn serialize_for_cache<T: Serialize>(entity: &str, value: &T) -> Result<Vec<u8>> {
    let envelope = CacheEnvelope::new(entity, value);
    postcard::to_allocvec(&envelope).map_err(|e| {
        error!("Cache serialization failed for {}: {}", entity, e);
        Error::SerializationError(e.to_string())
    })
}

/// Deserialize a value from cache storage with validation.
///
/// Checks, in order: the envelope decodes, the magic matches, the schema
/// version matches, and the entry was written by the same entity type.
///
/// # Errors
///
/// - `Error::DeserializationError`: Corrupted Postcard payload
/// - `Error::InvalidCacheEntry`: Invalid magic header or foreign entity prefix
/// - `Error::VersionMismatch`: Schema version mismatch
pub fn deserialize_from_cache<T: DeserializeOwned>(entity: &str, bytes: &[u8]) -> Result<T> {
    let envelope: CacheEnvelope<'_, T> = postcard::from_bytes(bytes).map_err(|e| {
        error!("Cache deserialization failed for {}: {}", entity, e);
        Error::DeserializationError(e.to_string())
    })?;

    if envelope.magic != CACHE_MAGIC {
        warn!(
            "Invalid cache entry for {}: expected magic {:?}, got {:?}",
            entity, CACHE_MAGIC, envelope.magic
        );
        return Err(Error::InvalidCacheEntry(format!(
            "Invalid magic: expected {:?}, got {:?}",
            CACHE_MAGIC, envelope.magic
        )));
    }

    if envelope.version != CURRENT_SCHEMA_VERSION {
        warn!(
            "Cache version mismatch for {}: expected {}, got {}",
            entity, CURRENT_SCHEMA_VERSION, envelope.version
        );
        return Err(Error::VersionMismatch {
            expected: CURRENT_SCHEMA_VERSION,
            found: envelope.version,
        });
    }

    if envelope.entity != entity {
        return Err(Error::InvalidCacheEntry(format!(
            "Entry written by {:?}, read as {:?}",
            envelope.entity, entity
        )));
    }

    Ok(envelope.payload)
}
