//! Invalidation listeners: how one cache's removals cascade into others.
//!
//! Listeners are registered per key kind ([`ListenerScope::Key`]) or for
//! every removal of the entity type ([`ListenerScope::Any`]). They run
//! synchronously on the invalidating caller's task, after the entity has been
//! removed from every index, so an "invalidate then reload" sequence always
//! observes fresh dependent state.
//!
//! A failing listener is isolated: it is logged, reported back as an
//! `Error::ListenerError`, and the remaining listeners still run. A stale
//! dependent cache is an acceptable degraded state; a half-removed primary
//! entry is not, and cannot happen here because removal has already finished.

use crate::entity::CacheEntity;
use crate::error::{Error, Result};
use crate::key::CacheKey;
use crate::singleflight::panic_message;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Key kind of an entity type.
pub type KindOf<T> = <<T as CacheEntity>::Key as CacheKey>::Kind;

/// Callback receiving the value that was just invalidated.
pub type Listener<T> = Arc<dyn Fn(&T) -> Result<()> + Send + Sync>;

/// Which invalidations a listener is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerScope<K> {
    /// Only invalidations issued through this key kind.
    Key(K),

    /// Every invalidation and every successful store of the entity type.
    Any,
}

struct Registration<T: CacheEntity> {
    scope: ListenerScope<KindOf<T>>,
    name: &'static str,
    callback: Listener<T>,
}

/// Listener registry for one entity type.
pub struct InvalidationBus<T: CacheEntity> {
    listeners: RwLock<Vec<Registration<T>>>,
}

impl<T: CacheEntity> InvalidationBus<T> {
    /// Create a bus with no listeners.
    pub fn new() -> Self {
        InvalidationBus {
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register `callback` for `scope`. `name` identifies it in logs and errors.
    pub fn register<F>(&self, scope: ListenerScope<KindOf<T>>, name: &'static str, callback: F)
    where
        F: Fn(&T) -> Result<()> + Send + Sync + 'static,
    {
        debug!(
            "Registered invalidation listener {}/{} on {:?}",
            T::cache_prefix(),
            name,
            scope
        );
        self.listeners.write().push(Registration {
            scope,
            name,
            callback: Arc::new(callback),
        });
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Run every listener matching `kind` (plus all `Any` listeners).
    ///
    /// `kind` is `None` for removals not issued through a key (stores,
    /// removal by primary id); those only reach `Any` listeners.
    ///
    /// Returns the failures; an empty vector means every listener succeeded.
    pub fn fire(&self, kind: Option<KindOf<T>>, value: &T) -> Vec<Error> {
        // Snapshot first: listeners may register more listeners or cascade
        // into caches whose listeners fire on this same thread.
        let matching: Vec<(&'static str, Listener<T>)> = self
            .listeners
            .read()
            .iter()
            .filter(|reg| match reg.scope {
                ListenerScope::Any => true,
                ListenerScope::Key(k) => Some(k) == kind,
            })
            .map(|reg| (reg.name, Arc::clone(&reg.callback)))
            .collect();

        let mut failures = Vec::new();
        for (name, callback) in matching {
            let reason = match catch_unwind(AssertUnwindSafe(|| callback(value))) {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
            };
            warn!(
                "Invalidation listener {}/{} failed: {}",
                T::cache_prefix(),
                name,
                reason
            );
            failures.push(Error::ListenerError(format!(
                "{}/{}: {}",
                T::cache_prefix(),
                name,
                reason
            )));
        }
        failures
    }
}

impl<T: CacheEntity> Default for InvalidationBus<T> {
    fn default() -> Self {
        Self::new()
    }
}
