//! Repository adapter trait: per-entity wiring between a cache and storage.
//!
//! The `RepositoryAdapter` trait decouples cached lookups from a specific
//! storage implementation. An adapter supplies:
//!
//! - the [`KeyedCache`] holding its entity type,
//! - a per-key loader ([`fetch`](RepositoryAdapter::fetch)) doing the storage read,
//! - optionally, [`hydrate`](RepositoryAdapter::hydrate), filling in related
//!   entities that are never cached with the value itself.
//!
//! [`get`](RepositoryAdapter::get) combines them: a cached load, then hydration
//! unless the request context is barebones.
//!
//! # Error Handling
//!
//! `fetch` reports absent rows as `Error::NotFound`; that is the expected path
//! for "does this exist" checks and is never cached. Any other failure comes
//! back from `get` with `entity[key]` context attached.
//!
//! Hydration must load related entities with [`RequestContext::barebones`] so
//! that e.g. a block's accounts do not in turn hydrate their own relations.

use crate::context::RequestContext;
use crate::entity::CacheEntity;
use crate::error::Result;
use crate::keyed::KeyedCache;
use std::future::Future;

/// Cached access to one entity type.
pub trait RepositoryAdapter<T: CacheEntity>: Send + Sync {
    /// The cache holding `T`.
    fn cache(&self) -> &KeyedCache<T>;

    /// Read the entity for `key` from storage.
    ///
    /// The returned future owns what it needs, since it may outlive the
    /// caller when other callers join the same load.
    ///
    /// # Errors
    /// `Error::NotFound` if no row matches, otherwise the storage error.
    fn fetch(
        &self,
        ctx: &RequestContext,
        key: &T::Key,
    ) -> impl Future<Output = Result<T>> + Send + 'static;

    /// Fill in relations of a freshly returned value.
    fn hydrate(
        &self,
        _ctx: &RequestContext,
        _value: &mut T,
    ) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }

    /// Cached load of `key`, hydrated unless `ctx` is barebones.
    ///
    /// # Errors
    /// Whatever [`KeyedCache::load`] or [`hydrate`](Self::hydrate) returned.
    fn get(&self, ctx: &RequestContext, key: &T::Key) -> impl Future<Output = Result<T>> + Send {
        async move {
            let mut value = self.cache().load(ctx, key, || self.fetch(ctx, key)).await?;
            if !ctx.is_barebones() {
                self.hydrate(ctx, &mut value).await?;
            }
            Ok(value)
        }
    }
}

#[cfg(all(test, feature = "inmemory"))]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::error::Error;
    use crate::model::{Account, AccountKey, User, UserKey};
    use crate::storage::{InMemoryStorage, Storage};

    struct Accounts {
        cache: KeyedCache<Account>,
        storage: InMemoryStorage<Account>,
    }

    impl RepositoryAdapter<Account> for Accounts {
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

    struct Users {
        cache: KeyedCache<User>,
        storage: InMemoryStorage<User>,
        accounts: Accounts,
    }

    impl RepositoryAdapter<User> for Users {
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
            let key = AccountKey::Id(user.account_id.clone());
            user.account = Some(self.accounts.get(&ctx.barebones(), &key).await?);
            Ok(())
        }
    }

    fn fixture() -> Users {
        let accounts = Accounts {
            cache: KeyedCache::new(CacheConfig::default()).unwrap(),
            storage: InMemoryStorage::new(),
        };
        accounts
            .storage
            .seed([Account::local("a1", "alice", "example.org")]);

        let users = Users {
            cache: KeyedCache::new(CacheConfig::default()).unwrap(),
            storage: InMemoryStorage::new(),
            accounts,
        };
        users
            .storage
            .seed([User::new("u1", "a1").with_email("a@example.org")]);
        users
    }

    #[tokio::test]
    async fn test_get_hydrates() {
        let users = fixture();
        let ctx = RequestContext::new();

        let user = users
            .get(&ctx, &UserKey::Email("a@example.org".to_string()))
            .await
            .unwrap();
        assert_eq!(user.account.map(|a| a.username), Some("alice".to_string()));
    }

    #[tokio::test]
    async fn test_barebones_skips_hydration() {
        let users = fixture();
        let ctx = RequestContext::new().barebones();

        let user = users
            .get(&ctx, &UserKey::Id("u1".to_string()))
            .await
            .unwrap();
        assert!(user.account.is_none());
        assert_eq!(users.accounts.storage.selects(), 0);
    }

    #[tokio::test]
    async fn test_second_get_is_served_from_cache() {
        let users = fixture();
        let ctx = RequestContext::new().barebones();

        users.get(&ctx, &UserKey::Id("u1".to_string())).await.unwrap();
        users
            .get(&ctx, &UserKey::AccountId("a1".to_string()))
            .await
            .unwrap();
        assert_eq!(users.storage.selects(), 1);
    }

    #[tokio::test]
    async fn test_missing_row_is_not_found() {
        let users = fixture();
        let res = users
            .get(&RequestContext::new(), &UserKey::Id("nobody".to_string()))
            .await;
        assert_eq!(res.map(|u| u.id), Err(Error::NotFound));
    }
}
