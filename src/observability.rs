//! Observability hooks for cache operations.
//!
//! Implement [`CacheMetrics`] to feed cache events into your monitoring
//! system. Every hook receives the printable cache key
//! (`"{prefix}:{name}:{parts}"`, see [`CacheKeyBuilder`](crate::key::CacheKeyBuilder)).
//!
//! ```ignore
//! use keyed_cache::observability::CacheMetrics;
//! use std::time::Duration;
//!
//! struct PrometheusMetrics;
//!
//! impl CacheMetrics for PrometheusMetrics {
//!     fn record_hit(&self, _key: &str, _duration: Duration) {
//!         // counter!("cache_hits").inc();
//!     }
//! }
//!
//! // let cache = KeyedCache::<User>::with_metrics(config, Arc::new(PrometheusMetrics))?;
//! ```
//!
//! Default method bodies log through the `log` crate; [`NoOpMetrics`]
//! discards everything.
//!
//! | Hook | Fired when |
//! |------|------------|
//! | `record_hit` | lookup served from the index |
//! | `record_miss` | lookup fell through to a load (leader only) |
//! | `record_coalesced` | caller joined another caller's in-flight load |
//! | `record_set` | value indexed after a load or store |
//! | `record_delete` | entity invalidated |
//! | `record_eviction` | sweep removed expired / excess entries |
//! | `record_error` | load, store or decode failed |

use std::time::Duration;

/// Trait for cache metrics collection.
pub trait CacheMetrics: Send + Sync {
    /// Record a cache hit.
    fn record_hit(&self, key: &str, duration: Duration) {
        debug!("Cache HIT: {} took {:?}", key, duration);
    }

    /// Record a cache miss that triggered a backend read.
    fn record_miss(&self, key: &str, duration: Duration) {
        debug!("Cache MISS: {} took {:?}", key, duration);
    }

    /// Record a caller that waited on another caller's backend read.
    fn record_coalesced(&self, key: &str, duration: Duration) {
        debug!("Cache COALESCED: {} took {:?}", key, duration);
    }

    /// Record a value being indexed.
    fn record_set(&self, key: &str, duration: Duration) {
        debug!("Cache SET: {} took {:?}", key, duration);
    }

    /// Record an invalidation.
    fn record_delete(&self, key: &str, duration: Duration) {
        debug!("Cache DELETE: {} took {:?}", key, duration);
    }

    /// Record entries removed by an eviction sweep.
    fn record_eviction(&self, cache: &str, expired: usize, excess: usize) {
        debug!(
            "Cache EVICT: {} removed {} expired, {} over capacity",
            cache, expired, excess
        );
    }

    /// Record an error.
    fn record_error(&self, key: &str, error: &str) {
        warn!("Cache ERROR for {}: {}", key, error);
    }
}

/// Default metrics implementation (no-op).
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl CacheMetrics for NoOpMetrics {
    fn record_hit(&self, _key: &str, _duration: Duration) {}
    fn record_miss(&self, _key: &str, _duration: Duration) {}
    fn record_coalesced(&self, _key: &str, _duration: Duration) {}
    fn record_set(&self, _key: &str, _duration: Duration) {}
    fn record_delete(&self, _key: &str, _duration: Duration) {}
    fn record_eviction(&self, _cache: &str, _expired: usize, _excess: usize) {}
    fn record_error(&self, _key: &str, _error: &str) {}
}

/// Metrics implementation that only logs, using the trait defaults.
#[derive(Clone, Default)]
pub struct LogMetrics;

impl CacheMetrics for LogMetrics {}
