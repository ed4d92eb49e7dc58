//! Core entity trait that all cached entities must implement.

use crate::error::Result;
use crate::key::CacheKey;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::hash::Hash;

/// Trait that all entities stored in a [`KeyedCache`](crate::KeyedCache) must implement.
///
/// An entity has exactly one primary identity and one or more natural keys.
/// Every key returned by [`cache_keys`](CacheEntity::cache_keys) resolves to
/// the entity once it is cached, regardless of which key it was loaded by.
///
/// Related entities attached during hydration must be `#[serde(skip)]`: only
/// the barebones model is ever cached.
///
/// # Example
///
/// ```
/// use keyed_cache::CacheEntity;
/// use keyed_cache::model::{Account, AccountKey};
///
/// let account = Account::local("01HACCOUNT", "alice", "example.org");
/// assert!(account.cache_keys().contains(&AccountKey::Id("01HACCOUNT".to_string())));
/// assert_eq!(Account::cache_prefix(), "account");
/// ```
pub trait CacheEntity: Send + Sync + Serialize + DeserializeOwned + Clone + 'static {
    /// Type of the entity's primary identity.
    type Id: Debug + Clone + Send + Sync + Eq + Hash + 'static;

    /// Closed set of natural keys for this entity.
    type Key: CacheKey;

    /// Return the entity's primary identity.
    fn cache_id(&self) -> Self::Id;

    /// Return every natural key derivable from this value.
    ///
    /// Optional fields that are unset (e.g. an unconfirmed email) simply
    /// contribute no key.
    fn cache_keys(&self) -> Vec<Self::Key>;

    /// Return the cache prefix for this entity type, e.g. `"user"`.
    ///
    /// Used in printable keys, metrics and the cache envelope.
    fn cache_prefix() -> &'static str;

    /// Serialize entity for cache storage.
    ///
    /// See `crate::serialization` for the envelope format.
    fn serialize_for_cache(&self) -> Result<Vec<u8>> {
        crate::serialization::serialize_for_cache(Self::cache_prefix(), self)
    }

    /// Deserialize entity from cache storage.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidCacheEntry`: Bad magic, wrong entity prefix or corrupted envelope
    /// - `Error::VersionMismatch`: Schema version changed
    /// - `Error::DeserializationError`: Corrupted payload
    fn deserialize_from_cache(bytes: &[u8]) -> Result<Self> {
        crate::serialization::deserialize_from_cache(Self::cache_prefix(), bytes)
    }

    /// Optional: Validate entity before it is indexed.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}
