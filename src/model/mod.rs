//! Cached domain models of the federated server.
//!
//! Each model lists its natural keys as a closed enum (`*Key`) plus a
//! value-less tag enum (`*KeyKind`) used for listener registration.
//! Relations filled in by hydration are `#[serde(skip)]` and never cached.

mod account;
mod block;
mod user;
mod visibility;

pub use account::{Account, AccountKey, AccountKeyKind};
pub use block::{Block, BlockKey, BlockKeyKind};
pub use user::{User, UserKey, UserKeyKind};
pub use visibility::{Visibility, VisibilityKey, VisibilityKeyKind};

/// Unset and empty optional columns do not produce a key.
pub(crate) fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}
