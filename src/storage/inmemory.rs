// ============================================================================
// In-Memory Storage
// ============================================================================

use super::{BlockStorage, Storage};
use crate::context::RequestContext;
use crate::entity::CacheEntity;
use crate::error::{Error, Result};
use crate::key::CacheKeyBuilder;
use crate::model::Block;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Shared<T: CacheEntity> {
    rows: RwLock<HashMap<T::Id, T>>,
    selects: AtomicUsize,
    latency: Mutex<Option<Duration>>,
    fail_next_write: Mutex<Option<Error>>,
}

/// Table-like storage kept in process memory.
///
/// Every natural key of a row acts as a unique constraint. Intended for tests
/// and local runs: it can simulate latency, count reads and fail writes on
/// demand.
///
/// # Example
///
/// ```
/// use keyed_cache::model::{User, UserKey};
/// use keyed_cache::storage::{InMemoryStorage, Storage};
/// use keyed_cache::RequestContext;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> keyed_cache::Result<()> {
/// let storage: InMemoryStorage<User> = InMemoryStorage::new();
/// let ctx = RequestContext::new();
///
/// storage.insert(&ctx, &User::new("u1", "a1").with_email("a@example.org")).await?;
///
/// let user = storage.select(&ctx, &UserKey::Email("a@example.org".into())).await?;
/// assert_eq!(user.id, "u1");
/// assert_eq!(storage.selects(), 1);
/// # Ok(())
/// # }
/// ```
pub struct InMemoryStorage<T: CacheEntity> {
    shared: Arc<Shared<T>>,
}

impl<T: CacheEntity> Clone for InMemoryStorage<T> {
    fn clone(&self) -> Self {
        InMemoryStorage {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: CacheEntity> InMemoryStorage<T> {
    pub fn new() -> Self {
        InMemoryStorage {
            shared: Arc::new(Shared {
                rows: RwLock::new(HashMap::new()),
                selects: AtomicUsize::new(0),
                latency: Mutex::new(None),
                fail_next_write: Mutex::new(None),
            }),
        }
    }

    /// Delay every call by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(Some(latency));
        self
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.shared.latency.lock() = latency;
    }

    /// Put rows in place directly, bypassing constraints.
    pub fn seed(&self, rows: impl IntoIterator<Item = T>) {
        let mut table = self.shared.rows.write();
        for row in rows {
            table.insert(row.cache_id(), row);
        }
    }

    /// Current row for `id`, read without going through [`Storage`].
    pub fn row(&self, id: &T::Id) -> Option<T> {
        self.shared.rows.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.shared.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `select` calls served so far.
    pub fn selects(&self) -> usize {
        self.shared.selects.load(Ordering::SeqCst)
    }

    /// Make the next insert, update or delete fail with `error`.
    pub fn fail_next_write(&self, error: Error) {
        *self.shared.fail_next_write.lock() = Some(error);
    }

    async fn pause(&self) {
        let latency = *self.shared.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn injected_failure(&self) -> Result<()> {
        match self.shared.fail_next_write.lock().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Reject `value` if another row already owns one of its keys.
    fn check_unique(rows: &HashMap<T::Id, T>, value: &T) -> Result<()> {
        let id = value.cache_id();
        let keys = value.cache_keys();
        for (other_id, row) in rows {
            if *other_id == id {
                continue;
            }
            if let Some(key) = row.cache_keys().into_iter().find(|k| keys.contains(k)) {
                return Err(Error::StorageError(format!(
                    "duplicate key value violates unique constraint {}",
                    CacheKeyBuilder::build::<T>(&key)
                )));
            }
        }
        Ok(())
    }
}

impl<T: CacheEntity> Default for InMemoryStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: CacheEntity> Storage<T> for InMemoryStorage<T> {
    async fn select(&self, ctx: &RequestContext, key: &T::Key) -> Result<T> {
        ctx.run(async {
            self.shared.selects.fetch_add(1, Ordering::SeqCst);
            self.pause().await;

            let rows = self.shared.rows.read();
            rows.values()
                .find(|row| row.cache_keys().contains(key))
                .cloned()
                .ok_or(Error::NotFound)
        })
        .await
    }

    async fn insert(&self, ctx: &RequestContext, value: &T) -> Result<()> {
        ctx.run(async {
            self.pause().await;
            self.injected_failure()?;

            let mut rows = self.shared.rows.write();
            if rows.contains_key(&value.cache_id()) {
                return Err(Error::StorageError(format!(
                    "duplicate primary key {:?}",
                    value.cache_id()
                )));
            }
            Self::check_unique(&rows, value)?;
            rows.insert(value.cache_id(), value.clone());
            Ok(())
        })
        .await
    }

    async fn update(&self, ctx: &RequestContext, value: &T, columns: &[&str]) -> Result<()> {
        ctx.run(async {
            self.pause().await;
            self.injected_failure()?;

            let mut rows = self.shared.rows.write();
            if !rows.contains_key(&value.cache_id()) {
                return Err(Error::NotFound);
            }
            Self::check_unique(&rows, value)?;
            trace!(
                "Updating {}[{:?}] columns {:?}",
                T::cache_prefix(),
                value.cache_id(),
                columns
            );
            // rows are stored whole
            rows.insert(value.cache_id(), value.clone());
            Ok(())
        })
        .await
    }

    async fn delete(&self, ctx: &RequestContext, id: &T::Id) -> Result<()> {
        ctx.run(async {
            self.pause().await;
            self.injected_failure()?;

            self.shared.rows.write().remove(id);
            Ok(())
        })
        .await
    }

    async fn select_all(&self, ctx: &RequestContext) -> Result<Vec<T>> {
        ctx.run(async {
            self.shared.selects.fetch_add(1, Ordering::SeqCst);
            self.pause().await;
            Ok(self.shared.rows.read().values().cloned().collect())
        })
        .await
    }
}

impl BlockStorage for InMemoryStorage<Block> {
    async fn block_ids_involving(&self, ctx: &RequestContext, account_id: &str) -> Result<Vec<String>> {
        ctx.run(async {
            self.pause().await;

            let rows = self.shared.rows.read();
            let mut ids: Vec<String> = rows
                .values()
                .filter(|block| block.involves(account_id))
                .map(|block| block.id.clone())
                .collect();
            ids.sort();
            Ok(ids)
        })
        .await
    }
}
