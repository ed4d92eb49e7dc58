//! Typed natural keys and cache key formatting.
//!
//! Every entity exposes its lookups as a closed enum: one variant per natural
//! key, each carrying its own typed key parts. A lookup name can therefore
//! never be misspelled, and composite keys (e.g. a pair of account IDs) are
//! just variants with more than one field.

use crate::entity::CacheEntity;
use std::fmt::{self, Debug, Display};
use std::hash::Hash;

/// A natural key under which an entity can be found.
///
/// # Example
///
/// ```
/// use keyed_cache::key::{CacheKey, CacheKeyBuilder};
/// use std::fmt;
///
/// #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// enum NoteKind { Id, Slug }
///
/// #[derive(Clone, Debug, PartialEq, Eq, Hash)]
/// enum NoteKey { Id(String), Slug(String) }
///
/// impl CacheKey for NoteKey {
///     type Kind = NoteKind;
///     fn kind(&self) -> NoteKind {
///         match self {
///             NoteKey::Id(_) => NoteKind::Id,
///             NoteKey::Slug(_) => NoteKind::Slug,
///         }
///     }
///     fn name(&self) -> &'static str {
///         match self {
///             NoteKey::Id(_) => "ID",
///             NoteKey::Slug(_) => "Slug",
///         }
///     }
///     fn parts(&self) -> Vec<&str> {
///         match self {
///             NoteKey::Id(v) | NoteKey::Slug(v) => vec![v.as_str()],
///         }
///     }
/// }
///
/// impl fmt::Display for NoteKey {
///     fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
///         CacheKeyBuilder::fmt_key(self, f)
///     }
/// }
///
/// assert_eq!(NoteKey::Slug("hello".into()).to_string(), "Slug:hello");
/// ```
pub trait CacheKey: Clone + Debug + Display + Eq + Hash + Send + Sync + 'static {
    /// Tag identifying which lookup this key belongs to, without its value.
    ///
    /// Invalidation listeners are registered per kind.
    type Kind: Copy + Debug + Eq + Hash + Send + Sync + 'static;

    /// The lookup this key belongs to.
    fn kind(&self) -> Self::Kind;

    /// Human readable lookup name, e.g. `"AccountID.TargetAccountID"`.
    fn name(&self) -> &'static str;

    /// Ordered key parts, e.g. `["01F8...", "01G2..."]`.
    fn parts(&self) -> Vec<&str>;
}

/// Builder for printable cache keys.
///
/// Cache lookups never go through strings; these are only used for logs,
/// metrics and error context.
pub struct CacheKeyBuilder;

impl CacheKeyBuilder {
    /// Build the full printable key: `"{prefix}:{name}:{part}[:{part}...]"`.
    pub fn build<T: CacheEntity>(key: &T::Key) -> String {
        format!("{}:{}", T::cache_prefix(), key)
    }

    /// Build composite key from multiple parts.
    pub fn build_composite(parts: &[&str]) -> String {
        parts.join(":")
    }

    /// Parse a composite key into parts.
    pub fn parse(key: &str) -> Vec<&str> {
        key.split(':').collect()
    }

    /// Shared `Display` body for key enums: `"{name}:{part}[:{part}...]"`.
    pub fn fmt_key<K: CacheKey>(key: &K, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            key.name(),
            Self::build_composite(&key.parts())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BlockKey, UserKey};
    use crate::model::User;

    #[test]
    fn test_cache_key_builder() {
        let key = CacheKeyBuilder::build::<User>(&UserKey::Email("a@example.org".to_string()));
        assert_eq!(key, "user:Email:a@example.org");
    }

    #[test]
    fn test_composite_key_display() {
        let key = BlockKey::AccountIdTargetAccountId {
            account_id: "a1".to_string(),
            target_account_id: "a2".to_string(),
        };
        assert_eq!(key.to_string(), "AccountID.TargetAccountID:a1:a2");
        assert_eq!(key.parts(), vec!["a1", "a2"]);
    }

    #[test]
    fn test_composite_key_builder() {
        let key = CacheKeyBuilder::build_composite(&["user", "123", "profile"]);
        assert_eq!(key, "user:123:profile");
    }

    #[test]
    fn test_composite_key_parser() {
        let parts = CacheKeyBuilder::parse("block:ID:b1");
        assert_eq!(parts, vec!["block", "ID", "b1"]);
    }

    #[test]
    fn test_key_kinds_ignore_values() {
        let a = UserKey::Email("a@example.org".to_string());
        let b = UserKey::Email("b@example.org".to_string());
        assert_ne!(a, b);
        assert_eq!(a.kind(), b.kind());
    }
}
