//! Multi-index entity cache - main entry point for cache operations.
//!
//! A [`KeyedCache`] holds one entity type. Every cached entity lives in a
//! single slot addressed by its primary id; each of its natural keys points at
//! that id through a shared index, so a value loaded by email is a hit by id
//! and vice versa.
//!
//! ```text
//!   UserKey::Email("a@…") ─┐
//!   UserKey::Id("u1") ─────┼──▶ "u1" ──▶ Slot { envelope bytes, keys, ages }
//!   UserKey::AccountId(…) ─┘
//! ```
//!
//! Hits take the read lock only. Misses go through a [`SingleFlightGroup`],
//! so concurrent callers for one key share one backend read. Index mutations
//! (store, invalidate, sweep, indexing a loaded value) take the write lock.
//! Backend I/O never runs under either.
//!
//! Loads race with writes through a generation counter: every `store` and
//! `invalidate` advances it, and a flight only indexes its value if the counter
//! has not moved since the flight began.

use crate::config::CacheConfig;
use crate::context::RequestContext;
use crate::entity::CacheEntity;
use crate::error::{Error, Result};
use crate::invalidation::{InvalidationBus, KindOf, ListenerScope};
use crate::key::{CacheKey, CacheKeyBuilder};
use crate::observability::{CacheMetrics, NoOpMetrics};
use crate::singleflight::{FlightRole, SingleFlightGroup};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

/// Point-in-time snapshot of a cache's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// Callers that joined another caller's backend read.
    pub coalesced: u64,
    pub stores: u64,
    pub invalidations: u64,
    pub evictions: u64,
    /// Identities evicted because one of their keys now belongs to another.
    pub stale_alias_corrections: u64,
}

/// Outcome of a single [`KeyedCache::sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Entries removed because they outlived the TTL.
    pub expired: usize,
    /// Entries removed because the cache was over capacity.
    pub excess: usize,
    /// Entries left afterwards.
    pub remaining: usize,
}

/// Outcome of an invalidation.
#[derive(Debug, Clone)]
pub struct Invalidation<T> {
    /// The entity that was removed, if one was cached.
    pub removed: Option<T>,

    /// Listener failures. Removal itself has completed regardless.
    pub errors: Vec<Error>,
}

impl<T> Invalidation<T> {
    fn none() -> Self {
        Invalidation {
            removed: None,
            errors: Vec::new(),
        }
    }

    /// Whether every listener succeeded.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    stores: AtomicU64,
    invalidations: AtomicU64,
    evictions: AtomicU64,
    stale_alias_corrections: AtomicU64,
}

struct Slot<T: CacheEntity> {
    seq: u64,
    bytes: Arc<[u8]>,
    keys: Vec<T::Key>,
    inserted_at: Instant,
    last_used: AtomicU64,
}

struct State<T: CacheEntity> {
    entries: HashMap<T::Id, Slot<T>>,
    index: HashMap<T::Key, T::Id>,
    next_seq: u64,
}

impl<T: CacheEntity> State<T> {
    fn new() -> Self {
        State {
            entries: HashMap::new(),
            index: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Drop the slot for `id` along with every index key still pointing at it.
    fn remove_entry(&mut self, id: &T::Id) -> Option<Slot<T>> {
        let slot = self.entries.remove(id)?;
        for key in &slot.keys {
            if self.index.get(key) == Some(id) {
                self.index.remove(key);
            }
        }
        Some(slot)
    }
}

#[derive(Clone, Copy)]
enum IndexMode {
    /// Result of a flight that began at `generation`.
    Loaded { generation: u64 },

    /// Value just written to storage.
    Stored,
}

struct Inner<T: CacheEntity> {
    config: CacheConfig,
    state: RwLock<State<T>>,
    /// Keyed by generation too, so a load that starts after a write never
    /// joins a flight that began before it.
    flights: SingleFlightGroup<(T::Key, u64), T>,
    bus: InvalidationBus<T>,
    generation: AtomicU64,
    clock: AtomicU64,
    counters: Counters,
    metrics: Arc<dyn CacheMetrics>,
}

impl<T: CacheEntity> Inner<T> {
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn is_expired(&self, slot: &Slot<T>, now: Instant) -> bool {
        self.config
            .ttl()
            .is_some_and(|ttl| now.duration_since(slot.inserted_at) >= ttl)
    }

    /// Index lookup. Decoding happens outside the lock.
    fn lookup(&self, key: &T::Key) -> Result<Option<T>> {
        let (id, seq, bytes) = {
            let state = self.state.read();
            let Some(id) = state.index.get(key) else {
                return Ok(None);
            };
            let Some(slot) = state.entries.get(id) else {
                return Ok(None);
            };
            if self.is_expired(slot, Instant::now()) {
                return Ok(None);
            }
            slot.last_used.store(self.tick(), Ordering::Relaxed);
            (id.clone(), slot.seq, Arc::clone(&slot.bytes))
        };

        match T::deserialize_from_cache(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(
                    "Evicting corrupt cache entry {}: {}",
                    CacheKeyBuilder::build::<T>(key),
                    e
                );
                let mut state = self.state.write();
                // only if nobody replaced it meanwhile
                if state.entries.get(&id).is_some_and(|slot| slot.seq == seq) {
                    state.remove_entry(&id);
                    self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                }
                Err(e.with_context(T::cache_prefix(), key))
            }
        }
    }

    /// Register `value` under all of its keys. Returns whether it was indexed.
    fn index(&self, value: &T, mode: IndexMode) -> Result<bool> {
        let bytes: Arc<[u8]> = value.serialize_for_cache()?.into();
        let id = value.cache_id();
        let keys = value.cache_keys();
        let now = Instant::now();
        let tick = self.tick();

        let mut state = self.state.write();
        match mode {
            IndexMode::Loaded { generation } => {
                if self.generation.load(Ordering::Acquire) != generation {
                    debug!(
                        "Not indexing {}[{:?}]: invalidated while loading",
                        T::cache_prefix(),
                        id
                    );
                    return Ok(false);
                }
            }
            IndexMode::Stored => {
                self.generation.fetch_add(1, Ordering::AcqRel);
            }
        }

        let superseded: Vec<T::Id> = keys
            .iter()
            .filter_map(|key| state.index.get(key))
            .filter(|other| **other != id)
            .cloned()
            .collect();
        for other in superseded {
            if state.remove_entry(&other).is_some() {
                self.counters
                    .stale_alias_corrections
                    .fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Stale alias: {}[{:?}] superseded by {:?}",
                    T::cache_prefix(),
                    other,
                    id
                );
            }
        }

        state.remove_entry(&id);
        let seq = state.next_seq;
        state.next_seq += 1;
        for key in &keys {
            state.index.insert(key.clone(), id.clone());
        }
        state.entries.insert(
            id,
            Slot {
                seq,
                bytes,
                keys,
                inserted_at: now,
                last_used: AtomicU64::new(tick),
            },
        );
        Ok(true)
    }

    /// Body of a flight: await the loader, then index its value.
    async fn fill<Fut>(self: Arc<Self>, key: T::Key, generation: u64, load: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();

        // a flight for this key may have finished since our lookup
        if let Ok(Some(value)) = self.lookup(&key) {
            return Ok(value);
        }

        let value = load
            .await
            .map_err(|e| e.with_context(T::cache_prefix(), &key))?;
        value.validate()?;

        match self.index(&value, IndexMode::Loaded { generation }) {
            Ok(true) => self
                .metrics
                .record_set(&CacheKeyBuilder::build::<T>(&key), started.elapsed()),
            Ok(false) => {}
            Err(e) => error!(
                "Failed to index {}: {}",
                CacheKeyBuilder::build::<T>(&key),
                e
            ),
        }
        Ok(value)
    }

    /// Drop whatever is cached under `value`'s identity, any of its keys, or
    /// `also`. Returns the number of entries removed.
    fn forget(&self, value: &T, also: Option<&T::Key>) -> usize {
        let mut state = self.state.write();
        self.generation.fetch_add(1, Ordering::AcqRel);

        let mut ids = vec![value.cache_id()];
        for key in value.cache_keys().iter().chain(also) {
            if let Some(other) = state.index.get(key) {
                ids.push(other.clone());
            }
        }

        let mut removed = 0;
        for id in &ids {
            if state.remove_entry(id).is_some() {
                removed += 1;
            }
        }
        removed
    }

    fn decode_removed(&self, slot: Slot<T>) -> Option<T> {
        match T::deserialize_from_cache(&slot.bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(
                    "Invalidated {} entry could not be decoded, listeners skipped: {}",
                    T::cache_prefix(),
                    e
                );
                None
            }
        }
    }
}

/// Capacity/TTL bounded cache for one entity type, indexed by every natural key.
///
/// Cloning is cheap and yields a handle to the same cache.
///
/// # Example
///
/// ```
/// use keyed_cache::{CacheConfig, KeyedCache, RequestContext};
/// use keyed_cache::model::{User, UserKey};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> keyed_cache::Result<()> {
/// let cache: KeyedCache<User> = KeyedCache::new(CacheConfig::default())?;
/// let ctx = RequestContext::new();
///
/// let user = User::new("u1", "a1").with_email("a@example.org");
/// cache.store(&user, || async { Ok(()) }).await?;
///
/// let by_email = cache
///     .load(&ctx, &UserKey::Email("a@example.org".into()), || async {
///         Err(keyed_cache::Error::NotFound)
///     })
///     .await?;
/// assert_eq!(by_email.id, "u1");
/// # Ok(())
/// # }
/// ```
pub struct KeyedCache<T: CacheEntity> {
    inner: Arc<Inner<T>>,
}

impl<T: CacheEntity> Clone for KeyedCache<T> {
    fn clone(&self) -> Self {
        KeyedCache {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: CacheEntity> KeyedCache<T> {
    /// Create an empty cache.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` if `config` does not validate.
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::with_metrics(config, Arc::new(NoOpMetrics))
    }

    /// Create an empty cache reporting to `metrics`.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` if `config` does not validate.
    pub fn with_metrics(config: CacheConfig, metrics: Arc<dyn CacheMetrics>) -> Result<Self> {
        config.validate()?;
        Ok(KeyedCache {
            inner: Arc::new(Inner {
                config,
                state: RwLock::new(State::new()),
                flights: SingleFlightGroup::new(),
                bus: InvalidationBus::new(),
                generation: AtomicU64::new(0),
                clock: AtomicU64::new(0),
                counters: Counters::default(),
                metrics,
            }),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Return the entity for `key`, calling `loader` on a miss.
    ///
    /// `loader` only runs if this caller leads the flight for `key`; callers
    /// that arrive while it runs receive the same outcome. A loaded value is
    /// indexed under all of its keys, unless the cache was written to while it
    /// was loading. Errors are never cached.
    ///
    /// # Errors
    ///
    /// - `Error::NotFound` when the loader reports no row.
    /// - `Error::StorageError` for other loader failures, or a corrupt cached
    ///   entry (which is evicted), with `entity[key]` context.
    /// - `Error::Timeout` when the request deadline elapses while waiting on
    ///   another caller's load.
    /// - `Error::ValidationError` when the loaded value fails validation.
    pub async fn load<F, Fut>(&self, ctx: &RequestContext, key: &T::Key, loader: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let timer = Instant::now();

        match self.inner.lookup(key) {
            Ok(Some(value)) => {
                self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                self.inner
                    .metrics
                    .record_hit(&CacheKeyBuilder::build::<T>(key), timer.elapsed());
                return Ok(value);
            }
            Ok(None) => {}
            Err(e) => {
                self.inner
                    .metrics
                    .record_error(&CacheKeyBuilder::build::<T>(key), &e.to_string());
                return Err(e);
            }
        }

        let inner = Arc::clone(&self.inner);
        let flight_key = key.clone();
        let generation = self.inner.generation.load(Ordering::Acquire);
        let (res, role) = self
            .inner
            .flights
            .run((key.clone(), generation), ctx.deadline(), move || {
                let load = loader();
                inner.fill(flight_key, generation, load)
            })
            .await;

        let printable = CacheKeyBuilder::build::<T>(key);
        match role {
            FlightRole::Leader => {
                self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
                self.inner.metrics.record_miss(&printable, timer.elapsed());
            }
            FlightRole::Follower => {
                self.inner.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                self.inner
                    .metrics
                    .record_coalesced(&printable, timer.elapsed());
            }
        }

        match res {
            Ok(value) => Ok(value),
            Err(e) => {
                if !e.is_not_found() {
                    self.inner.metrics.record_error(&printable, &e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Write `value` through `writer`, then cache it under all of its keys.
    ///
    /// The cache is only touched once `writer` succeeds; the value replaces any
    /// cached copy unconditionally, and any-key listeners are notified so
    /// dependent caches reset.
    ///
    /// # Errors
    ///
    /// Returns the validation error, or the writer's error with `entity[key]`
    /// context. A failed write leaves the cache untouched.
    pub async fn store<F, Fut>(&self, value: &T, writer: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let timer = Instant::now();
        value.validate()?;

        let label = label_of(value);
        if let Err(e) = writer().await {
            let e = e.with_context(T::cache_prefix(), &label);
            if !e.is_not_found() {
                self.inner
                    .metrics
                    .record_error(&format!("{}:{}", T::cache_prefix(), label), &e.to_string());
            }
            return Err(e);
        }

        if let Err(e) = self.inner.index(value, IndexMode::Stored) {
            error!(
                "Stored {}:{} but failed to cache it: {}",
                T::cache_prefix(),
                label,
                e
            );
            self.inner.forget(value, None);
        }

        self.inner.counters.stores.fetch_add(1, Ordering::Relaxed);
        self.inner
            .metrics
            .record_set(&format!("{}:{}", T::cache_prefix(), label), timer.elapsed());

        self.inner.bus.fire(None, value);
        Ok(())
    }

    /// Remove the entity indexed under `key` from every key it is cached under,
    /// then run the listeners for `key`'s kind and all any-key listeners.
    ///
    /// Invalidating an uncached key is a no-op apart from aborting the indexing
    /// of loads already in flight.
    pub fn invalidate(&self, key: &T::Key) -> Invalidation<T> {
        let timer = Instant::now();
        let removed = {
            let mut state = self.inner.state.write();
            self.inner.generation.fetch_add(1, Ordering::AcqRel);
            let id = state.index.get(key).cloned();
            id.and_then(|id| state.remove_entry(&id))
        };

        let Some(slot) = removed else {
            return Invalidation::none();
        };

        self.inner
            .counters
            .invalidations
            .fetch_add(1, Ordering::Relaxed);
        self.inner
            .metrics
            .record_delete(&CacheKeyBuilder::build::<T>(key), timer.elapsed());

        match self.inner.decode_removed(slot) {
            Some(value) => Invalidation {
                errors: self.inner.bus.fire(Some(key.kind()), &value),
                removed: Some(value),
            },
            None => Invalidation::none(),
        }
    }

    /// Like [`invalidate`](Self::invalidate), addressed by primary id.
    ///
    /// Only any-key listeners run.
    pub fn invalidate_id(&self, id: &T::Id) -> Invalidation<T> {
        let removed = {
            let mut state = self.inner.state.write();
            self.inner.generation.fetch_add(1, Ordering::AcqRel);
            state.remove_entry(id)
        };

        let Some(slot) = removed else {
            return Invalidation::none();
        };

        self.inner
            .counters
            .invalidations
            .fetch_add(1, Ordering::Relaxed);
        debug!("Invalidated {}[{:?}] by id", T::cache_prefix(), id);

        match self.inner.decode_removed(slot) {
            Some(value) => Invalidation {
                errors: self.inner.bus.fire(None, &value),
                removed: Some(value),
            },
            None => Invalidation::none(),
        }
    }

    /// Remove `value`, a row just read from storage, from every key it or
    /// `key` is cached under, then run the listeners for `key`'s kind and all
    /// any-key listeners with it.
    ///
    /// Unlike [`invalidate`](Self::invalidate), listeners run even if nothing
    /// was cached, so dependent caches reset after a delete regardless of what
    /// this cache held at that moment.
    pub fn invalidate_value(&self, key: &T::Key, value: &T) -> Invalidation<T> {
        let timer = Instant::now();
        let removed = self.inner.forget(value, Some(key));

        if removed > 0 {
            self.inner
                .counters
                .invalidations
                .fetch_add(removed as u64, Ordering::Relaxed);
            self.inner
                .metrics
                .record_delete(&CacheKeyBuilder::build::<T>(key), timer.elapsed());
        }

        Invalidation {
            errors: self.inner.bus.fire(Some(key.kind()), value),
            removed: Some(value.clone()),
        }
    }

    /// Register a callback run synchronously after matching invalidations.
    pub fn register_invalidation_listener<F>(
        &self,
        scope: ListenerScope<KindOf<T>>,
        name: &'static str,
        listener: F,
    ) where
        F: Fn(&T) -> Result<()> + Send + Sync + 'static,
    {
        self.inner.bus.register(scope, name, listener);
    }

    /// Peek at the cached entity for `key` without loading.
    ///
    /// # Errors
    ///
    /// `Error::StorageError` if the cached entry is corrupt; it is evicted.
    pub fn get_cached(&self, key: &T::Key) -> Result<Option<T>> {
        self.inner.lookup(key)
    }

    /// Whether a live entry is indexed under `key`.
    pub fn contains(&self, key: &T::Key) -> bool {
        let state = self.inner.state.read();
        state
            .index
            .get(key)
            .and_then(|id| state.entries.get(id))
            .is_some_and(|slot| !self.inner.is_expired(slot, Instant::now()))
    }

    /// Number of cached entities, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.inner.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of loads currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.flights.in_flight()
    }

    /// Drop every entry. Listeners are not notified.
    pub fn clear(&self) {
        let mut state = self.inner.state.write();
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        state.entries.clear();
        state.index.clear();
        debug!("Cleared {} cache", T::cache_prefix());
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.inner.counters;
        CacheStats {
            entries: self.len(),
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            stores: c.stores.load(Ordering::Relaxed),
            invalidations: c.invalidations.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            stale_alias_corrections: c.stale_alias_corrections.load(Ordering::Relaxed),
        }
    }

    /// Evict entries past the TTL, then least-recently-used entries until the
    /// cache fits its maximum size.
    ///
    /// In-flight loads are unaffected and listeners are not notified.
    pub fn sweep(&self) -> SweepStats {
        let now = Instant::now();
        let max_size = self.inner.config.max_size;

        let (expired, excess, remaining) = {
            let mut state = self.inner.state.write();

            let stale: Vec<T::Id> = state
                .entries
                .iter()
                .filter(|(_, slot)| self.inner.is_expired(slot, now))
                .map(|(id, _)| id.clone())
                .collect();
            for id in &stale {
                state.remove_entry(id);
            }

            let over = state.entries.len().saturating_sub(max_size);
            if over > 0 {
                let mut by_use: Vec<(u64, T::Id)> = state
                    .entries
                    .iter()
                    .map(|(id, slot)| (slot.last_used.load(Ordering::Relaxed), id.clone()))
                    .collect();
                by_use.sort_unstable_by_key(|(tick, _)| *tick);
                for (_, id) in by_use.into_iter().take(over) {
                    state.remove_entry(&id);
                }
            }

            (stale.len(), over, state.entries.len())
        };

        if expired + excess > 0 {
            self.inner
                .counters
                .evictions
                .fetch_add((expired + excess) as u64, Ordering::Relaxed);
            self.inner
                .metrics
                .record_eviction(T::cache_prefix(), expired, excess);
        }

        SweepStats {
            expired,
            excess,
            remaining,
        }
    }
}

/// First natural key of `value`, for logs and error context.
fn label_of<T: CacheEntity>(value: &T) -> String {
    match value.cache_keys().first() {
        Some(key) => key.to_string(),
        None => format!("{:?}", value.cache_id()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{User, UserKey, UserKeyKind};
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn user() -> User {
        User::new("u1", "a1").with_email("a@example.org")
    }

    async fn never_loads(ctx: &RequestContext, cache: &KeyedCache<User>, key: UserKey) -> Result<User> {
        cache
            .load(ctx, &key, || async {
                Err(Error::Other("loader must not run".to_string()))
            })
            .await
    }

    #[tokio::test]
    async fn test_store_then_hit_via_every_key() {
        let cache: KeyedCache<User> = KeyedCache::new(CacheConfig::default()).unwrap();
        let ctx = RequestContext::new();
        let user = user().with_external_id("oidc|1");

        cache.store(&user, || async { Ok(()) }).await.unwrap();

        for key in user.cache_keys() {
            let got = never_loads(&ctx, &cache, key).await.unwrap();
            assert_eq!(got, user);
        }
        assert_eq!(cache.stats().hits, 4);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_trace() {
        let cache: KeyedCache<User> = KeyedCache::new(CacheConfig::default()).unwrap();

        let err = cache
            .store(&user(), || async {
                Err(Error::StorageError("unique violation".to_string()))
            })
            .await
            .unwrap_err();

        assert!(err.to_string().contains("user[ID:u1]"));
        assert!(cache.is_empty());
        assert!(!cache.contains(&UserKey::Email("a@example.org".to_string())));
    }

    #[tokio::test]
    async fn test_not_found_is_not_cached() {
        let cache: KeyedCache<User> = KeyedCache::new(CacheConfig::default()).unwrap();
        let ctx = RequestContext::new();
        let key = UserKey::Email("a@example.org".to_string());

        let res = cache.load(&ctx, &key, || async { Err(Error::NotFound) }).await;
        assert_eq!(res, Err(Error::NotFound));

        let got = cache
            .load(&ctx, &key, || async { Ok(user()) })
            .await
            .unwrap();
        assert_eq!(got.id, "u1");
        assert_eq!(cache.stats().misses, 2);
    }

    #[tokio::test]
    async fn test_loader_error_gains_context() {
        let cache: KeyedCache<User> = KeyedCache::new(CacheConfig::default()).unwrap();
        let ctx = RequestContext::new();

        let err = cache
            .load(&ctx, &UserKey::Id("u9".to_string()), || async {
                Err(Error::StorageError("connection reset".to_string()))
            })
            .await
            .unwrap_err();

        assert_eq!(
            err,
            Error::StorageError("user[ID:u9]: connection reset".to_string())
        );
    }

    #[tokio::test]
    async fn test_key_change_drops_old_alias() {
        let cache: KeyedCache<User> = KeyedCache::new(CacheConfig::default()).unwrap();
        cache.store(&user(), || async { Ok(()) }).await.unwrap();

        let moved = User {
            email: Some("b@example.org".to_string()),
            ..user()
        };
        cache.store(&moved, || async { Ok(()) }).await.unwrap();

        assert!(!cache.contains(&UserKey::Email("a@example.org".to_string())));
        assert!(cache.contains(&UserKey::Email("b@example.org".to_string())));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().stale_alias_corrections, 0);
    }

    #[tokio::test]
    async fn test_stale_alias_evicts_superseded_identity() {
        let cache: KeyedCache<User> = KeyedCache::new(CacheConfig::default()).unwrap();
        cache.store(&user(), || async { Ok(()) }).await.unwrap();

        // the address now belongs to another user
        let other = User::new("u2", "a2").with_email("a@example.org");
        cache.store(&other, || async { Ok(()) }).await.unwrap();

        assert!(!cache.contains(&UserKey::Id("u1".to_string())));
        assert!(!cache.contains(&UserKey::AccountId("a1".to_string())));
        let by_email = cache
            .get_cached(&UserKey::Email("a@example.org".to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(by_email.id, "u2");
        assert_eq!(cache.stats().stale_alias_corrections, 1);
    }

    #[tokio::test]
    async fn test_invalidate_removes_all_keys_and_notifies() {
        let cache: KeyedCache<User> = KeyedCache::new(CacheConfig::default()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let captured = Arc::clone(&seen);
        cache.register_invalidation_listener(
            ListenerScope::Key(UserKeyKind::Id),
            "record",
            move |user: &User| {
                captured.lock().push(user.id.clone());
                Ok(())
            },
        );

        cache.store(&user(), || async { Ok(()) }).await.unwrap();
        let outcome = cache.invalidate(&UserKey::Id("u1".to_string()));

        assert!(outcome.is_clean());
        assert_eq!(outcome.removed.map(|u| u.id), Some("u1".to_string()));
        assert_eq!(*seen.lock(), vec!["u1".to_string()]);
        for key in user().cache_keys() {
            assert!(!cache.contains(&key));
        }
    }

    #[tokio::test]
    async fn test_invalidate_uncached_key_is_noop() {
        let cache: KeyedCache<User> = KeyedCache::new(CacheConfig::default()).unwrap();
        let outcome = cache.invalidate(&UserKey::Id("nobody".to_string()));
        assert!(outcome.removed.is_none());
        assert!(outcome.is_clean());
        assert_eq!(cache.stats().invalidations, 0);
    }

    #[tokio::test]
    async fn test_invalidate_id_fires_any_listeners_only() {
        let cache: KeyedCache<User> = KeyedCache::new(CacheConfig::default()).unwrap();
        let keyed = Arc::new(AtomicUsize::new(0));
        let any = Arc::new(AtomicUsize::new(0));

        let k = Arc::clone(&keyed);
        cache.register_invalidation_listener(
            ListenerScope::Key(UserKeyKind::Id),
            "keyed",
            move |_: &User| {
                k.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        );
        let a = Arc::clone(&any);
        cache.register_invalidation_listener(ListenerScope::Any, "any", move |_: &User| {
            a.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        cache.store(&user(), || async { Ok(()) }).await.unwrap();
        assert_eq!(any.load(Ordering::SeqCst), 1);

        let outcome = cache.invalidate_id(&"u1".to_string());
        assert!(outcome.removed.is_some());
        assert_eq!(keyed.load(Ordering::SeqCst), 0);
        assert_eq!(any.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidation_during_load_is_not_overwritten() {
        let cache: KeyedCache<User> = KeyedCache::new(CacheConfig::default()).unwrap();
        let ctx = RequestContext::new();
        let (release, wait) = tokio::sync::oneshot::channel::<()>();
        let key = UserKey::Id("u1".to_string());

        let loading = {
            let cache = cache.clone();
            let ctx = ctx.clone();
            let key = key.clone();
            tokio::spawn(async move {
                cache
                    .load(&ctx, &key, || async move {
                        let _ = wait.await;
                        Ok(user())
                    })
                    .await
            })
        };

        while cache.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        cache.invalidate(&key);
        release.send(()).unwrap();

        let loaded = loading.await.unwrap().unwrap();
        assert_eq!(loaded.id, "u1");
        assert!(!cache.contains(&key));
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_invalidate_value_notifies_when_uncached() {
        let cache: KeyedCache<User> = KeyedCache::new(CacheConfig::default()).unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        cache.register_invalidation_listener(ListenerScope::Any, "count", move |_: &User| {
            s.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let key = UserKey::Id("u1".to_string());
        let outcome = cache.invalidate_value(&key, &user());
        assert_eq!(outcome.removed.map(|u| u.id), Some("u1".to_string()));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().invalidations, 0);

        cache.store(&user(), || async { Ok(()) }).await.unwrap();
        let outcome = cache.invalidate_value(&key, &user());
        assert!(outcome.is_clean());
        assert!(cache.is_empty());
        assert!(!cache.contains(&UserKey::Email("a@example.org".to_string())));
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[tokio::test]
    async fn test_abandoned_load_still_completes() {
        let cache: KeyedCache<User> = KeyedCache::new(CacheConfig::default()).unwrap();
        let ctx = RequestContext::new();
        let key = UserKey::Id("u1".to_string());
        let calls = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&calls);
        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            cache.load(&ctx, &key, || async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                c.fetch_add(1, Ordering::SeqCst);
                Ok(user())
            }),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(cache.in_flight(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.invalidate(&key);
        let fresh = User {
            email: Some("new@example.org".to_string()),
            ..user()
        };
        let c = Arc::clone(&calls);
        let got = cache
            .load(&ctx, &key, || async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(fresh)
            })
            .await
            .unwrap();
        assert_eq!(got.email.as_deref(), Some("new@example.org"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_load_after_invalidation_does_not_join_older_flight() {
        let cache: KeyedCache<User> = KeyedCache::new(CacheConfig::default()).unwrap();
        let ctx = RequestContext::new();
        let key = UserKey::Id("u1".to_string());
        let (release, wait) = tokio::sync::oneshot::channel::<()>();

        let older = {
            let cache = cache.clone();
            let ctx = ctx.clone();
            let key = key.clone();
            tokio::spawn(async move {
                cache
                    .load(&ctx, &key, || async move {
                        let _ = wait.await;
                        Ok(user())
                    })
                    .await
            })
        };
        while cache.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        cache.invalidate(&key);
        let fresh = User {
            email: Some("new@example.org".to_string()),
            ..user()
        };
        let got = cache
            .load(&ctx, &key, || async move { Ok(fresh) })
            .await
            .unwrap();
        assert_eq!(got.email.as_deref(), Some("new@example.org"));
        assert!(cache.contains(&UserKey::Email("new@example.org".to_string())));

        release.send(()).unwrap();
        let stale = older.await.unwrap().unwrap();
        assert_eq!(stale.email.as_deref(), Some("a@example.org"));
        assert!(!cache.contains(&UserKey::Email("a@example.org".to_string())));
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_evicted() {
        let cache: KeyedCache<User> = KeyedCache::new(CacheConfig::default()).unwrap();
        let ctx = RequestContext::new();
        cache.store(&user(), || async { Ok(()) }).await.unwrap();

        if let Some(slot) = cache.inner.state.write().entries.get_mut("u1") {
            slot.bytes = Arc::from(&b"not an envelope"[..]);
        }

        let key = UserKey::Email("a@example.org".to_string());
        let err = never_loads(&ctx, &cache, key.clone()).await.unwrap_err();
        assert!(matches!(err, Error::StorageError(ref msg) if msg.contains("corrupt cache entry")));
        assert!(cache.is_empty());

        let reloaded = cache.load(&ctx, &key, || async { Ok(user()) }).await.unwrap();
        assert_eq!(reloaded.id, "u1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_a_miss_and_swept() {
        let config = CacheConfig::default().with_ttl(Duration::from_secs(60));
        let cache: KeyedCache<User> = KeyedCache::new(config).unwrap();
        cache.store(&user(), || async { Ok(()) }).await.unwrap();
        assert!(cache.contains(&UserKey::Id("u1".to_string())));

        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(!cache.contains(&UserKey::Id("u1".to_string())));
        assert_eq!(cache.get_cached(&UserKey::Id("u1".to_string())), Ok(None));

        let stats = cache.sweep();
        assert_eq!(
            stats,
            SweepStats {
                expired: 1,
                excess: 0,
                remaining: 0
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sub_second_ttl_serves_hits() {
        let config = CacheConfig::default().with_ttl(Duration::from_millis(500));
        let cache: KeyedCache<User> = KeyedCache::new(config).unwrap();
        let ctx = RequestContext::new();
        cache.store(&user(), || async { Ok(()) }).await.unwrap();

        let got = never_loads(&ctx, &cache, UserKey::Id("u1".to_string())).await;
        assert_eq!(got.map(|u| u.id), Ok("u1".to_string()));

        tokio::time::advance(Duration::from_millis(501)).await;
        assert!(!cache.contains(&UserKey::Id("u1".to_string())));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = CacheConfig::default().with_max_size(0);
        let res: Result<KeyedCache<User>> = KeyedCache::new(config);
        assert!(matches!(res, Err(Error::ConfigError(_))));

        let config = CacheConfig::default().with_ttl(Duration::ZERO);
        let res: Result<KeyedCache<User>> = KeyedCache::new(config);
        assert!(matches!(res, Err(Error::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_sweep_evicts_least_recently_used() {
        let config = CacheConfig::default().with_max_size(2).without_ttl();
        let cache: KeyedCache<User> = KeyedCache::new(config).unwrap();

        for (id, account) in [("u1", "a1"), ("u2", "a2"), ("u3", "a3")] {
            let user = User::new(id, account);
            cache.store(&user, || async { Ok(()) }).await.unwrap();
        }
        // touch u1 so u2 becomes the oldest
        cache.get_cached(&UserKey::Id("u1".to_string())).unwrap();

        let stats = cache.sweep();
        assert_eq!(stats.excess, 1);
        assert_eq!(stats.remaining, 2);
        assert!(cache.contains(&UserKey::Id("u1".to_string())));
        assert!(!cache.contains(&UserKey::Id("u2".to_string())));
        assert!(cache.contains(&UserKey::Id("u3".to_string())));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let cache: KeyedCache<User> = KeyedCache::new(CacheConfig::default()).unwrap();
        cache.store(&user(), || async { Ok(()) }).await.unwrap();
        cache.clear();
        assert!(cache.is_empty());
        assert!(!cache.contains(&UserKey::Id("u1".to_string())));
    }
}
