use crate::entity::CacheEntity;
use crate::key::{CacheKey, CacheKeyBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Memoized answer to "may `requester_id` see `target_id`'s account".
///
/// Derived from blocks in both directions, never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visibility {
    pub requester_id: String,
    pub target_id: String,
    pub visible: bool,
}

impl Visibility {
    pub fn new(requester_id: &str, target_id: &str, visible: bool) -> Self {
        Visibility {
            requester_id: requester_id.to_string(),
            target_id: target_id.to_string(),
            visible,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VisibilityKeyKind {
    RequesterIdTargetId,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum VisibilityKey {
    RequesterIdTargetId {
        requester_id: String,
        target_id: String,
    },
}

impl VisibilityKey {
    pub fn pair(requester_id: &str, target_id: &str) -> Self {
        VisibilityKey::RequesterIdTargetId {
            requester_id: requester_id.to_string(),
            target_id: target_id.to_string(),
        }
    }
}

impl CacheKey for VisibilityKey {
    type Kind = VisibilityKeyKind;

    fn kind(&self) -> VisibilityKeyKind {
        VisibilityKeyKind::RequesterIdTargetId
    }

    fn name(&self) -> &'static str {
        "RequesterID.TargetID"
    }

    fn parts(&self) -> Vec<&str> {
        match self {
            VisibilityKey::RequesterIdTargetId {
                requester_id,
                target_id,
            } => vec![requester_id.as_str(), target_id.as_str()],
        }
    }
}

impl fmt::Display for VisibilityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        CacheKeyBuilder::fmt_key(self, f)
    }
}

impl CacheEntity for Visibility {
    type Id = (String, String);
    type Key = VisibilityKey;

    fn cache_id(&self) -> (String, String) {
        (self.requester_id.clone(), self.target_id.clone())
    }

    fn cache_keys(&self) -> Vec<VisibilityKey> {
        vec![VisibilityKey::pair(&self.requester_id, &self.target_id)]
    }

    fn cache_prefix() -> &'static str {
        "visibility"
    }
}
