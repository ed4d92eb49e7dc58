//! Cached data access for the server's entities.
//!
//! [`Database`] is the application root: it owns the [`Caches`] and hands them
//! to one repository per entity type. Repositories are generic over their
//! [`Storage`] so the same cache wiring runs against any backend.

mod account;
mod admin;
mod block;
mod user;
mod visibility;

pub use account::AccountRepository;
pub use admin::{AdminDb, NewSignup};
pub use block::BlockRepository;
pub use user::UserRepository;
pub use visibility::VisibilityFilter;

use crate::caches::Caches;
use crate::entity::CacheEntity;
use crate::error::Result;
use crate::keyed::Invalidation;
use crate::model::{Account, User};
use crate::storage::{BlockStorage, Storage};

#[cfg(feature = "inmemory")]
use crate::{config::CachesConfig, model::Block, storage::InMemoryStorage};

/// Outcome of a delete: the storage error with `entity[key]` context, else
/// the first listener that failed to reset a dependent cache.
pub(crate) fn finish_delete<T: CacheEntity>(
    res: Result<()>,
    key: &T::Key,
    outcome: Invalidation<T>,
) -> Result<()> {
    res.map_err(|e| e.with_context(T::cache_prefix(), key))?;
    match outcome.errors.into_iter().next() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Append `updated_at` to an explicit column list. An empty list means every
/// column and is left alone.
pub(crate) fn with_updated_at<'a>(columns: &[&'a str]) -> Vec<&'a str> {
    let mut columns = columns.to_vec();
    if !columns.is_empty() && !columns.contains(&"updated_at") {
        columns.push("updated_at");
    }
    columns
}

/// Every repository, sharing one set of caches.
#[derive(Clone)]
pub struct Database<A, U, B> {
    caches: Caches,
    pub accounts: AccountRepository<A>,
    pub users: UserRepository<U, A>,
    pub blocks: BlockRepository<B, A>,
    pub visibility: VisibilityFilter<B, A>,
    pub admin: AdminDb<A, U>,
}

impl<A, U, B> Database<A, U, B>
where
    A: Storage<Account>,
    U: Storage<User>,
    B: BlockStorage,
{
    /// Wire repositories for `host` over the given storages.
    pub fn new(caches: Caches, host: &str, accounts: A, users: U, blocks: B) -> Self {
        let accounts = AccountRepository::new(caches.account.clone(), accounts);
        let users = UserRepository::new(caches.user.clone(), users, accounts.clone());
        let blocks = BlockRepository::new(caches.block.clone(), blocks, accounts.clone());
        let visibility = VisibilityFilter::new(caches.visibility.clone(), blocks.clone());
        let admin = AdminDb::new(accounts.clone(), users.clone(), host);

        Database {
            caches,
            accounts,
            users,
            blocks,
            visibility,
            admin,
        }
    }

    pub fn caches(&self) -> &Caches {
        &self.caches
    }
}

/// [`Database`] over in-memory storage.
#[cfg(feature = "inmemory")]
pub type InMemoryDatabase =
    Database<InMemoryStorage<Account>, InMemoryStorage<User>, InMemoryStorage<Block>>;

#[cfg(feature = "inmemory")]
impl InMemoryDatabase {
    /// Fresh caches over empty in-memory tables.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` if `config` does not validate.
    pub fn in_memory(config: &CachesConfig, host: &str) -> Result<Self> {
        Ok(Database::new(
            Caches::new(config)?,
            host,
            InMemoryStorage::new(),
            InMemoryStorage::new(),
            InMemoryStorage::new(),
        ))
    }
}
