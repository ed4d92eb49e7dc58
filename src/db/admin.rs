use super::{AccountRepository, UserRepository};
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::model::{Account, User};
use crate::storage::Storage;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Details of a local sign-up.
#[derive(Clone, Debug, Default)]
pub struct NewSignup {
    pub username: String,
    pub email: String,
    /// Already hashed by the caller.
    pub password_hash: String,
    pub locale: String,
    pub external_id: Option<String>,
    /// Skip email confirmation.
    pub email_verified: bool,
    /// Grant admin and moderator rights.
    pub admin: bool,
    pub pre_approved: bool,
}

/// Administrative account management.
#[derive(Clone)]
pub struct AdminDb<A, U> {
    accounts: AccountRepository<A>,
    users: UserRepository<U, A>,
    host: String,
    blocked_email_domains: Arc<RwLock<HashSet<String>>>,
}

impl<A: Storage<Account>, U: Storage<User>> AdminDb<A, U> {
    pub fn new(accounts: AccountRepository<A>, users: UserRepository<U, A>, host: &str) -> Self {
        AdminDb {
            accounts,
            users,
            host: host.to_string(),
            blocked_email_domains: Arc::default(),
        }
    }

    /// Refuse sign-ups with addresses at `domain`.
    pub fn block_email_domain(&self, domain: &str) {
        self.blocked_email_domains
            .write()
            .insert(domain.to_lowercase());
    }

    /// Whether no local account holds `username`.
    pub async fn is_username_available(
        &self,
        ctx: &RequestContext,
        username: &str,
    ) -> Result<bool> {
        match self
            .accounts
            .get_account_by_username_domain(&ctx.barebones(), username, None)
            .await
        {
            Ok(_) => Ok(false),
            Err(e) if e.is_not_found() => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Whether no user holds `email`, confirmed or pending.
    ///
    /// # Errors
    ///
    /// `Error::ValidationError` if `email` is not an address or its domain is
    /// blocked.
    pub async fn is_email_available(&self, ctx: &RequestContext, email: &str) -> Result<bool> {
        let domain = email_domain(email).ok_or_else(|| {
            Error::ValidationError(format!("error parsing email address {}", email))
        })?;
        if self
            .blocked_email_domains
            .read()
            .contains(&domain.to_lowercase())
        {
            return Err(Error::ValidationError(format!(
                "email domain {} is blocked",
                domain
            )));
        }

        match self
            .users
            .get_user_by_email_address(&ctx.barebones(), email)
            .await
        {
            Ok(_) => return Ok(false),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        // pending addresses are not a lookup key
        let users = self.users.get_all_users(&ctx.barebones()).await?;
        Ok(!users
            .iter()
            .any(|user| user.unconfirmed_email.as_deref() == Some(email)))
    }

    /// Create the local account and user for a sign-up.
    ///
    /// Safe to retry: an account or user left behind by an earlier, partly
    /// failed attempt is reused rather than duplicated.
    pub async fn new_signup(&self, ctx: &RequestContext, signup: NewSignup) -> Result<User> {
        let account = match self
            .accounts
            .get_account_by_username_domain(ctx, &signup.username, None)
            .await
        {
            Ok(account) => account,
            Err(e) if e.is_not_found() => {
                let account = Account::local(&new_id(), &signup.username, &self.host);
                self.accounts.put_account(ctx, &account).await?;
                account
            }
            Err(e) => return Err(e),
        };

        match self
            .users
            .get_user_by_account_id(&ctx.barebones(), &account.id)
            .await
        {
            Ok(mut user) => {
                debug!("Sign-up for {} reuses user {}", signup.username, user.id);
                user.account = Some(account);
                return Ok(user);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let mut user = User::new(&new_id(), &account.id);
        user.encrypted_password = signup.password_hash;
        user.locale = signup.locale;
        user.external_id = signup.external_id;
        user.unconfirmed_email = Some(signup.email.clone());
        if signup.email_verified {
            user.email = Some(signup.email);
            user.confirmed_at = Some(Utc::now());
        } else {
            user.confirmation_token = Some(new_id());
        }
        if signup.admin {
            user.admin = true;
            user.moderator = true;
        }
        user.approved = signup.pre_approved;

        self.users.put_user(ctx, &user).await?;
        info!("Signed up {} as user {}", signup.username, user.id);

        user.account = Some(account);
        Ok(user)
    }
}

/// Domain part of a bare `local@domain` address.
fn email_domain(email: &str) -> Option<&str> {
    let (local, domain) = email.split_once('@')?;
    if local.is_empty()
        || domain.is_empty()
        || domain.contains('@')
        || email.contains(char::is_whitespace)
    {
        return None;
    }
    Some(domain)
}

fn new_id() -> String {
    Uuid::now_v7().simple().to_string().to_uppercase()
}
