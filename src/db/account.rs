use super::{finish_delete, with_updated_at};
use crate::context::RequestContext;
use crate::error::Result;
use crate::keyed::KeyedCache;
use crate::model::{Account, AccountKey};
use crate::repository::RepositoryAdapter;
use crate::storage::Storage;
use chrono::Utc;
use std::future::Future;

/// Cached account lookups and writes.
#[derive(Clone)]
pub struct AccountRepository<S> {
    cache: KeyedCache<Account>,
    storage: S,
}

impl<S: Storage<Account>> AccountRepository<S> {
    pub fn new(cache: KeyedCache<Account>, storage: S) -> Self {
        AccountRepository { cache, storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub async fn get_account_by_id(&self, ctx: &RequestContext, id: &str) -> Result<Account> {
        self.get(ctx, &AccountKey::Id(id.to_string())).await
    }

    pub async fn get_account_by_uri(&self, ctx: &RequestContext, uri: &str) -> Result<Account> {
        self.get(ctx, &AccountKey::Uri(uri.to_string())).await
    }

    /// Look up by username; `domain` is `None` for local accounts.
    pub async fn get_account_by_username_domain(
        &self,
        ctx: &RequestContext,
        username: &str,
        domain: Option<&str>,
    ) -> Result<Account> {
        let key = AccountKey::UsernameDomain {
            username: username.to_string(),
            domain: domain.unwrap_or_default().to_string(),
        };
        self.get(ctx, &key).await
    }

    pub async fn put_account(&self, ctx: &RequestContext, account: &Account) -> Result<()> {
        self.cache
            .store(account, || self.storage.insert(ctx, account))
            .await
    }

    /// Write `columns` (all of them if empty), bumping `updated_at`.
    pub async fn update_account(
        &self,
        ctx: &RequestContext,
        account: &mut Account,
        columns: &[&str],
    ) -> Result<()> {
        account.updated_at = Utc::now();
        let columns = with_updated_at(columns);
        let account: &Account = account;
        self.cache
            .store(account, || self.storage.update(ctx, account, &columns))
            .await
    }

    /// Delete the account row. Deleting an unknown account succeeds.
    ///
    /// # Errors
    ///
    /// The storage error, or `Error::ListenerError` if the row was deleted
    /// but a dependent cache could not be reset.
    pub async fn delete_account_by_id(&self, ctx: &RequestContext, id: &str) -> Result<()> {
        let key = AccountKey::Id(id.to_string());

        // read it first so invalidation listeners see the row
        let account = match self.get(&ctx.barebones(), &key).await {
            Ok(account) => account,
            Err(e) => {
                self.cache.invalidate(&key);
                return if e.is_not_found() { Ok(()) } else { Err(e) };
            }
        };

        let res = self.storage.delete(ctx, &account.id).await;
        let outcome = self.cache.invalidate_value(&key, &account);
        finish_delete(res, &key, outcome)
    }
}

impl<S: Storage<Account>> RepositoryAdapter<Account> for AccountRepository<S> {
    fn cache(&self) -> &KeyedCache<Account> {
        &self.cache
    }

    fn fetch(
        &self,
        ctx: &RequestContext,
        key: &AccountKey,
    ) -> impl Future<Output = Result<Account>> + Send + 'static {
        let storage = self.storage.clone();
        let ctx = ctx.clone();
        let key = key.clone();
        async move { storage.select(&ctx, &key).await }
    }
}
