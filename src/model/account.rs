use crate::entity::CacheEntity;
use crate::key::{CacheKey, CacheKeyBuilder};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A local or remote actor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub username: String,
    /// `None` for accounts on this instance.
    pub domain: Option<String>,
    pub uri: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// A local account with URIs rooted at `host`.
    pub fn local(id: &str, username: &str, host: &str) -> Self {
        let now = Utc::now();
        Account {
            id: id.to_string(),
            username: username.to_string(),
            domain: None,
            uri: format!("https://{}/users/{}", host, username),
            display_name: username.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// A remote account living on `domain`.
    pub fn remote(id: &str, username: &str, domain: &str) -> Self {
        Account {
            domain: Some(domain.to_string()),
            ..Account::local(id, username, domain)
        }
    }

    pub fn is_local(&self) -> bool {
        self.domain.is_none()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccountKeyKind {
    Id,
    Uri,
    UsernameDomain,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AccountKey {
    Id(String),
    Uri(String),
    /// Local accounts use an empty domain.
    UsernameDomain { username: String, domain: String },
}

impl CacheKey for AccountKey {
    type Kind = AccountKeyKind;

    fn kind(&self) -> AccountKeyKind {
        match self {
            AccountKey::Id(_) => AccountKeyKind::Id,
            AccountKey::Uri(_) => AccountKeyKind::Uri,
            AccountKey::UsernameDomain { .. } => AccountKeyKind::UsernameDomain,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            AccountKey::Id(_) => "ID",
            AccountKey::Uri(_) => "URI",
            AccountKey::UsernameDomain { .. } => "Username.Domain",
        }
    }

    fn parts(&self) -> Vec<&str> {
        match self {
            AccountKey::Id(v) | AccountKey::Uri(v) => vec![v.as_str()],
            AccountKey::UsernameDomain { username, domain } => {
                vec![username.as_str(), domain.as_str()]
            }
        }
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        CacheKeyBuilder::fmt_key(self, f)
    }
}

impl CacheEntity for Account {
    type Id = String;
    type Key = AccountKey;

    fn cache_id(&self) -> String {
        self.id.clone()
    }

    fn cache_keys(&self) -> Vec<AccountKey> {
        vec![
            AccountKey::Id(self.id.clone()),
            AccountKey::Uri(self.uri.clone()),
            AccountKey::UsernameDomain {
                username: self.username.clone(),
                domain: self.domain.clone().unwrap_or_default(),
            },
        ]
    }

    fn cache_prefix() -> &'static str {
        "account"
    }
}
