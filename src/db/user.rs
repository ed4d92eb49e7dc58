use super::{finish_delete, with_updated_at, AccountRepository};
use crate::context::RequestContext;
use crate::error::Result;
use crate::keyed::KeyedCache;
use crate::model::{Account, User, UserKey};
use crate::repository::RepositoryAdapter;
use crate::storage::Storage;
use chrono::Utc;
use std::future::Future;

/// Cached user lookups and writes. Users hydrate their account.
#[derive(Clone)]
pub struct UserRepository<S, A> {
    cache: KeyedCache<User>,
    storage: S,
    accounts: AccountRepository<A>,
}

impl<S: Storage<User>, A: Storage<Account>> UserRepository<S, A> {
    pub fn new(cache: KeyedCache<User>, storage: S, accounts: AccountRepository<A>) -> Self {
        UserRepository {
            cache,
            storage,
            accounts,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub async fn get_user_by_id(&self, ctx: &RequestContext, id: &str) -> Result<User> {
        self.get(ctx, &UserKey::Id(id.to_string())).await
    }

    pub async fn get_user_by_account_id(
        &self,
        ctx: &RequestContext,
        account_id: &str,
    ) -> Result<User> {
        self.get(ctx, &UserKey::AccountId(account_id.to_string()))
            .await
    }

    pub async fn get_user_by_email_address(
        &self,
        ctx: &RequestContext,
        email: &str,
    ) -> Result<User> {
        self.get(ctx, &UserKey::Email(email.to_string())).await
    }

    pub async fn get_user_by_external_id(
        &self,
        ctx: &RequestContext,
        external_id: &str,
    ) -> Result<User> {
        self.get(ctx, &UserKey::ExternalId(external_id.to_string()))
            .await
    }

    pub async fn get_user_by_confirmation_token(
        &self,
        ctx: &RequestContext,
        token: &str,
    ) -> Result<User> {
        self.get(ctx, &UserKey::ConfirmationToken(token.to_string()))
            .await
    }

    /// Every user, straight from storage. Hydrated unless `ctx` is barebones.
    pub async fn get_all_users(&self, ctx: &RequestContext) -> Result<Vec<User>> {
        let mut users = self.storage.select_all(ctx).await?;
        if !ctx.is_barebones() {
            for user in &mut users {
                self.hydrate(ctx, user).await?;
            }
        }
        Ok(users)
    }

    pub async fn put_user(&self, ctx: &RequestContext, user: &User) -> Result<()> {
        self.cache
            .store(user, || self.storage.insert(ctx, user))
            .await
    }

    /// Write `columns` (all of them if empty), bumping `updated_at`.
    pub async fn update_user(
        &self,
        ctx: &RequestContext,
        user: &mut User,
        columns: &[&str],
    ) -> Result<()> {
        user.updated_at = Utc::now();
        let columns = with_updated_at(columns);
        let user: &User = user;
        self.cache
            .store(user, || self.storage.update(ctx, user, &columns))
            .await
    }

    /// Delete the user row. Deleting an unknown user succeeds.
    ///
    /// # Errors
    ///
    /// The storage error, or `Error::ListenerError` if the row was deleted
    /// but a dependent cache could not be reset.
    pub async fn delete_user_by_id(&self, ctx: &RequestContext, id: &str) -> Result<()> {
        let key = UserKey::Id(id.to_string());

        // read it first so invalidation listeners see the row
        let user = match self.get(&ctx.barebones(), &key).await {
            Ok(user) => user,
            Err(e) => {
                self.cache.invalidate(&key);
                return if e.is_not_found() { Ok(()) } else { Err(e) };
            }
        };

        let res = self.storage.delete(ctx, &user.id).await;
        let outcome = self.cache.invalidate_value(&key, &user);
        finish_delete(res, &key, outcome)
    }

    /// Promote the pending address behind `token` to the confirmed email.
    ///
    /// A user with nothing pending is returned unchanged.
    ///
    /// # Errors
    /// `Error::NotFound` if no user holds `token`.
    pub async fn confirm_email(&self, ctx: &RequestContext, token: &str) -> Result<User> {
        let mut user = self.get_user_by_confirmation_token(ctx, token).await?;

        let Some(email) = user.unconfirmed_email.take().filter(|e| !e.is_empty()) else {
            debug!("User {} has no email awaiting confirmation", user.id);
            return Ok(user);
        };

        user.email = Some(email);
        user.confirmed_at = Some(Utc::now());
        user.confirmation_token = None;
        self.update_user(
            ctx,
            &mut user,
            &[
                "email",
                "unconfirmed_email",
                "confirmed_at",
                "confirmation_token",
            ],
        )
        .await?;
        Ok(user)
    }
}

impl<S: Storage<User>, A: Storage<Account>> RepositoryAdapter<User> for UserRepository<S, A> {
    fn cache(&self) -> &KeyedCache<User> {
        &self.cache
    }

    fn fetch(
        &self,
        ctx: &RequestContext,
        key: &UserKey,
    ) -> impl Future<Output = Result<User>> + Send + 'static {
        let storage = self.storage.clone();
        let ctx = ctx.clone();
        let key = key.clone();
        async move { storage.select(&ctx, &key).await }
    }

    async fn hydrate(&self, ctx: &RequestContext, user: &mut User) -> Result<()> {
        if user.account.is_none() {
            let account = self
                .accounts
                .get_account_by_id(&ctx.barebones(), &user.account_id)
                .await?;
            user.account = Some(account);
        }
        Ok(())
    }
}
