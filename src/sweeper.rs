//! Background eviction: the only work this crate runs off the caller's task.
//!
//! A [`Sweeper`] ticks at a fixed interval and calls [`Sweep::sweep`] on every
//! registered cache. Missed ticks are delayed rather than bunched up, and the
//! first sweep happens one interval after start.

use crate::entity::CacheEntity;
use crate::keyed::{KeyedCache, SweepStats};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A cache that can be swept.
pub trait Sweep: Send + Sync {
    fn name(&self) -> &'static str;

    fn sweep(&self) -> SweepStats;
}

impl<T: CacheEntity> Sweep for KeyedCache<T> {
    fn name(&self) -> &'static str {
        T::cache_prefix()
    }

    fn sweep(&self) -> SweepStats {
        KeyedCache::sweep(self)
    }
}

/// Handle to the periodic sweep task. Dropping it stops the task.
pub struct Sweeper {
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Spawn the sweep task on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime, or if `every` is zero.
    /// `CachesConfig::validate` rejects a zero interval.
    pub fn start(every: Duration, caches: Vec<Arc<dyn Sweep>>) -> Self {
        info!(
            "Starting cache sweeper for {} caches every {:?}",
            caches.len(),
            every
        );

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.reset(); // otherwise first tick return immediately

            loop {
                interval.tick().await;
                for cache in &caches {
                    let stats = cache.sweep();
                    if stats.expired + stats.excess > 0 {
                        debug!(
                            "Swept {} cache: {} expired, {} over capacity, {} remaining",
                            cache.name(),
                            stats.expired,
                            stats.excess,
                            stats.remaining
                        );
                    }
                }
            }
        });

        Sweeper { handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop sweeping.
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.handle.abort();
        debug!("Cache sweeper stopped");
    }
}
