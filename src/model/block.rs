use super::Account;
use crate::entity::CacheEntity;
use crate::error::{Error, Result};
use crate::key::{CacheKey, CacheKeyBuilder};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// `account_id` blocks `target_account_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    pub uri: String,
    pub account_id: String,
    pub target_account_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Blocking account, filled in by hydration.
    #[serde(skip)]
    pub account: Option<Account>,

    /// Blocked account, filled in by hydration.
    #[serde(skip)]
    pub target_account: Option<Account>,
}

impl Block {
    pub fn new(id: &str, uri: &str, account_id: &str, target_account_id: &str) -> Self {
        let now = Utc::now();
        Block {
            id: id.to_string(),
            uri: uri.to_string(),
            account_id: account_id.to_string(),
            target_account_id: target_account_id.to_string(),
            created_at: now,
            updated_at: now,
            account: None,
            target_account: None,
        }
    }

    /// Whether this block involves `account_id` on either side.
    pub fn involves(&self, account_id: &str) -> bool {
        self.account_id == account_id || self.target_account_id == account_id
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockKeyKind {
    Id,
    Uri,
    AccountIdTargetAccountId,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum BlockKey {
    Id(String),
    Uri(String),
    AccountIdTargetAccountId {
        account_id: String,
        target_account_id: String,
    },
}

impl BlockKey {
    pub fn pair(account_id: &str, target_account_id: &str) -> Self {
        BlockKey::AccountIdTargetAccountId {
            account_id: account_id.to_string(),
            target_account_id: target_account_id.to_string(),
        }
    }
}

impl CacheKey for BlockKey {
    type Kind = BlockKeyKind;

    fn kind(&self) -> BlockKeyKind {
        match self {
            BlockKey::Id(_) => BlockKeyKind::Id,
            BlockKey::Uri(_) => BlockKeyKind::Uri,
            BlockKey::AccountIdTargetAccountId { .. } => BlockKeyKind::AccountIdTargetAccountId,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            BlockKey::Id(_) => "ID",
            BlockKey::Uri(_) => "URI",
            BlockKey::AccountIdTargetAccountId { .. } => "AccountID.TargetAccountID",
        }
    }

    fn parts(&self) -> Vec<&str> {
        match self {
            BlockKey::Id(v) | BlockKey::Uri(v) => vec![v.as_str()],
            BlockKey::AccountIdTargetAccountId {
                account_id,
                target_account_id,
            } => vec![account_id.as_str(), target_account_id.as_str()],
        }
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        CacheKeyBuilder::fmt_key(self, f)
    }
}

impl CacheEntity for Block {
    type Id = String;
    type Key = BlockKey;

    fn cache_id(&self) -> String {
        self.id.clone()
    }

    fn cache_keys(&self) -> Vec<BlockKey> {
        vec![
            BlockKey::Id(self.id.clone()),
            BlockKey::Uri(self.uri.clone()),
            BlockKey::pair(&self.account_id, &self.target_account_id),
        ]
    }

    fn cache_prefix() -> &'static str {
        "block"
    }

    fn validate(&self) -> Result<()> {
        if self.account_id == self.target_account_id {
            return Err(Error::ValidationError(format!(
                "account {} cannot block itself",
                self.account_id
            )));
        }
        Ok(())
    }
}
