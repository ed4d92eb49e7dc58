use super::{present, Account};
use crate::entity::CacheEntity;
use crate::error::{Error, Result};
use crate::key::{CacheKey, CacheKeyBuilder};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A local sign-in identity, owning exactly one account.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub account_id: String,
    /// Confirmed email address.
    pub email: Option<String>,
    /// Address awaiting confirmation.
    pub unconfirmed_email: Option<String>,
    /// Identifier at an external identity provider.
    pub external_id: Option<String>,
    pub confirmation_token: Option<String>,
    pub encrypted_password: String,
    pub locale: String,
    pub admin: bool,
    pub moderator: bool,
    pub approved: bool,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Filled in by hydration.
    #[serde(skip)]
    pub account: Option<Account>,
}

impl User {
    pub fn new(id: &str, account_id: &str) -> Self {
        let now = Utc::now();
        User {
            id: id.to_string(),
            account_id: account_id.to_string(),
            email: None,
            unconfirmed_email: None,
            external_id: None,
            confirmation_token: None,
            encrypted_password: String::new(),
            locale: "en".to_string(),
            admin: false,
            moderator: false,
            approved: false,
            confirmed_at: None,
            created_at: now,
            updated_at: now,
            account: None,
        }
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    pub fn with_unconfirmed_email(mut self, email: &str, token: &str) -> Self {
        self.unconfirmed_email = Some(email.to_string());
        self.confirmation_token = Some(token.to_string());
        self
    }

    pub fn with_external_id(mut self, external_id: &str) -> Self {
        self.external_id = Some(external_id.to_string());
        self
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed_at.is_some()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UserKeyKind {
    Id,
    AccountId,
    Email,
    ExternalId,
    ConfirmationToken,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum UserKey {
    Id(String),
    AccountId(String),
    Email(String),
    ExternalId(String),
    ConfirmationToken(String),
}

impl CacheKey for UserKey {
    type Kind = UserKeyKind;

    fn kind(&self) -> UserKeyKind {
        match self {
            UserKey::Id(_) => UserKeyKind::Id,
            UserKey::AccountId(_) => UserKeyKind::AccountId,
            UserKey::Email(_) => UserKeyKind::Email,
            UserKey::ExternalId(_) => UserKeyKind::ExternalId,
            UserKey::ConfirmationToken(_) => UserKeyKind::ConfirmationToken,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            UserKey::Id(_) => "ID",
            UserKey::AccountId(_) => "AccountID",
            UserKey::Email(_) => "Email",
            UserKey::ExternalId(_) => "ExternalID",
            UserKey::ConfirmationToken(_) => "ConfirmationToken",
        }
    }

    fn parts(&self) -> Vec<&str> {
        match self {
            UserKey::Id(v)
            | UserKey::AccountId(v)
            | UserKey::Email(v)
            | UserKey::ExternalId(v)
            | UserKey::ConfirmationToken(v) => vec![v.as_str()],
        }
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        CacheKeyBuilder::fmt_key(self, f)
    }
}

impl CacheEntity for User {
    type Id = String;
    type Key = UserKey;

    fn cache_id(&self) -> String {
        self.id.clone()
    }

    fn cache_keys(&self) -> Vec<UserKey> {
        let mut keys = vec![
            UserKey::Id(self.id.clone()),
            UserKey::AccountId(self.account_id.clone()),
        ];
        if let Some(email) = present(&self.email) {
            keys.push(UserKey::Email(email.to_string()));
        }
        if let Some(external_id) = present(&self.external_id) {
            keys.push(UserKey::ExternalId(external_id.to_string()));
        }
        if let Some(token) = present(&self.confirmation_token) {
            keys.push(UserKey::ConfirmationToken(token.to_string()));
        }
        keys
    }

    fn cache_prefix() -> &'static str {
        "user"
    }

    fn validate(&self) -> Result<()> {
        if self.id.is_empty() || self.account_id.is_empty() {
            return Err(Error::ValidationError(
                "user requires both id and account_id".to_string(),
            ));
        }
        Ok(())
    }
}
