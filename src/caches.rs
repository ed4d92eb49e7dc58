//! The set of entity caches owned by one database handle.
//!
//! Cross-cache cascades are wired here and nowhere else:
//!
//! | Source | Fires on | Invalidates |
//! |--------|----------|-------------|
//! | account | any store / invalidation | user by `AccountID` |
//! | block | any store / invalidation | visibility for both directions of the pair |

use crate::config::CachesConfig;
use crate::error::{Error, Result};
use crate::invalidation::ListenerScope;
use crate::keyed::KeyedCache;
use crate::model::{Account, Block, User, UserKey, Visibility, VisibilityKey};
use crate::observability::{CacheMetrics, NoOpMetrics};
use crate::sweeper::{Sweep, Sweeper};
use std::sync::Arc;
use std::time::Duration;

/// Entity caches with their invalidation cascades registered.
///
/// Cloning yields handles to the same caches.
#[derive(Clone)]
pub struct Caches {
    pub account: KeyedCache<Account>,
    pub user: KeyedCache<User>,
    pub block: KeyedCache<Block>,
    pub visibility: KeyedCache<Visibility>,
    sweep_interval: Duration,
}

impl Caches {
    /// # Errors
    ///
    /// Returns `Error::ConfigError` if `config` does not validate.
    pub fn new(config: &CachesConfig) -> Result<Self> {
        Self::with_metrics(config, Arc::new(NoOpMetrics))
    }

    pub fn with_metrics(config: &CachesConfig, metrics: Arc<dyn CacheMetrics>) -> Result<Self> {
        config.validate()?;
        let caches = Caches {
            account: KeyedCache::with_metrics(config.account.clone(), Arc::clone(&metrics))?,
            user: KeyedCache::with_metrics(config.user.clone(), Arc::clone(&metrics))?,
            block: KeyedCache::with_metrics(config.block.clone(), Arc::clone(&metrics))?,
            visibility: KeyedCache::with_metrics(config.visibility.clone(), metrics)?,
            sweep_interval: config.sweep_interval(),
        };
        caches.register_cascades();
        Ok(caches)
    }

    fn register_cascades(&self) {
        let users = self.user.clone();
        self.account.register_invalidation_listener(
            ListenerScope::Any,
            "user-by-account",
            move |account: &Account| {
                first_failure(users.invalidate(&UserKey::AccountId(account.id.clone())).errors)
            },
        );

        let visibility = self.visibility.clone();
        self.block.register_invalidation_listener(
            ListenerScope::Any,
            "visibility-by-pair",
            move |block: &Block| {
                let forward = VisibilityKey::pair(&block.account_id, &block.target_account_id);
                let backward = VisibilityKey::pair(&block.target_account_id, &block.account_id);
                let mut errors = visibility.invalidate(&forward).errors;
                errors.extend(visibility.invalidate(&backward).errors);
                first_failure(errors)
            },
        );
    }

    /// Every cache, for sweeping.
    pub fn sweepable(&self) -> Vec<Arc<dyn Sweep>> {
        vec![
            Arc::new(self.account.clone()) as Arc<dyn Sweep>,
            Arc::new(self.user.clone()),
            Arc::new(self.block.clone()),
            Arc::new(self.visibility.clone()),
        ]
    }

    /// Start the periodic sweep over every cache.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn_sweeper(&self) -> Sweeper {
        Sweeper::start(self.sweep_interval, self.sweepable())
    }

    /// Drop every cached entry without notifying listeners.
    pub fn clear(&self) {
        self.account.clear();
        self.user.clear();
        self.block.clear();
        self.visibility.clear();
    }
}

fn first_failure(errors: Vec<Error>) -> Result<()> {
    match errors.into_iter().next() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
