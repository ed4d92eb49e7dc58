//! Cache sizing and expiry configuration.
//!
//! Thresholds are operational settings, so every cache takes its own
//! [`CacheConfig`] and the whole set can be loaded from JSON:
//!
//! ```
//! use keyed_cache::config::CachesConfig;
//! use std::time::Duration;
//!
//! let config = CachesConfig::from_json_str(r#"{
//!     "user": { "max_size": 500, "ttl_secs": 60 },
//!     "sweep_interval_secs": 5
//! }"#).unwrap();
//!
//! assert_eq!(config.user.max_size, 500);
//! assert_eq!(config.user.ttl(), Some(Duration::from_secs(60)));
//! assert_eq!(config.account.max_size, 2000); // untouched sections keep defaults
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default maximum number of entities per cache.
pub const DEFAULT_MAX_SIZE: usize = 2000;

/// Default time an entity may stay cached.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Default interval between eviction sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Settings for a single [`KeyedCache`](crate::KeyedCache).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries beyond this count are evicted least-recently-used first.
    pub max_size: usize,

    /// How long an entry may stay cached; `None` disables expiry.
    ///
    /// Written as (possibly fractional) seconds, e.g. `"ttl_secs": 0.5`.
    #[serde(rename = "ttl_secs", with = "fractional_secs")]
    pub ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            max_size: DEFAULT_MAX_SIZE,
            ttl: Some(DEFAULT_TTL),
        }
    }
}

impl CacheConfig {
    /// Override the maximum number of entries.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Override the entry time-to-live.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Disable expiry; entries only leave through invalidation or capacity.
    pub fn without_ttl(mut self) -> Self {
        self.ttl = None;
        self
    }

    /// Entry time-to-live.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Reject settings no cache can work with.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` for a zero `max_size` or zero TTL.
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::ConfigError("max_size must be > 0".to_string()));
        }
        if self.ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(Error::ConfigError(
                "ttl_secs must be > 0 (null disables expiry)".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings for every entity cache owned by [`Caches`](crate::caches::Caches).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachesConfig {
    pub account: CacheConfig,
    pub user: CacheConfig,
    pub block: CacheConfig,
    pub visibility: CacheConfig,

    /// Seconds between background eviction sweeps.
    pub sweep_interval_secs: u64,
}

impl Default for CachesConfig {
    fn default() -> Self {
        CachesConfig {
            account: CacheConfig::default(),
            user: CacheConfig::default(),
            block: CacheConfig::default(),
            visibility: CacheConfig::default().with_ttl(Duration::from_secs(30 * 60)),
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL.as_secs(),
        }
    }
}

impl CachesConfig {
    /// Parse and validate a JSON document. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` if the JSON is malformed or a value is invalid.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: CachesConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Interval between background eviction sweeps.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` naming the offending section.
    pub fn validate(&self) -> Result<()> {
        for (name, section) in [
            ("account", &self.account),
            ("user", &self.user),
            ("block", &self.block),
            ("visibility", &self.visibility),
        ] {
            section
                .validate()
                .map_err(|e| Error::ConfigError(format!("{}: {}", name, e)))?;
        }
        if self.sweep_interval_secs == 0 {
            return Err(Error::ConfigError(
                "sweep_interval_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// `Option<Duration>` as optional fractional seconds.
mod fractional_secs {
    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(ttl: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        ttl.map(|d| d.as_secs_f64()).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        match Option::<f64>::deserialize(d)? {
            Some(secs) => Duration::try_from_secs_f64(secs)
                .map(Some)
                .map_err(de::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.max_size, DEFAULT_MAX_SIZE);
        assert_eq!(config.ttl(), Some(DEFAULT_TTL));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = CacheConfig::default()
            .with_max_size(10)
            .with_ttl(Duration::from_secs(30));
        assert_eq!(config.max_size, 10);
        assert_eq!(config.ttl(), Some(Duration::from_secs(30)));
        assert_eq!(config.without_ttl().ttl(), None);
    }

    #[test]
    fn test_zero_size_rejected() {
        let config = CacheConfig::default().with_max_size(0);
        assert!(matches!(config.validate(), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_json_section_error_names_section() {
        let err = CachesConfig::from_json_str(r#"{ "block": { "max_size": 0 } }"#).unwrap_err();
        match err {
            Error::ConfigError(msg) => assert!(msg.starts_with("block:")),
            e => panic!("Expected ConfigError, got {:?}", e),
        }
    }

    #[test]
    fn test_json_null_ttl_disables_expiry() {
        let config = CachesConfig::from_json_str(r#"{ "account": { "ttl_secs": null } }"#).unwrap();
        assert_eq!(config.account.ttl(), None);
        assert_eq!(config.account.max_size, DEFAULT_MAX_SIZE);
    }

    #[test]
    fn test_sub_second_ttl_kept() {
        let config = CacheConfig::default().with_ttl(Duration::from_millis(500));
        assert_eq!(config.ttl(), Some(Duration::from_millis(500)));
        assert!(config.validate().is_ok());

        let config = CachesConfig::from_json_str(r#"{ "user": { "ttl_secs": 0.25 } }"#).unwrap();
        assert_eq!(config.user.ttl(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_zero_ttl_and_interval_rejected() {
        let config = CacheConfig::default().with_ttl(Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::ConfigError(_))));

        let config = CachesConfig {
            sweep_interval_secs: 0,
            ..CachesConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::ConfigError(_))));
        assert!(CachesConfig::from_json_str(r#"{ "block": { "ttl_secs": -1 } }"#).is_err());
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(matches!(
            CachesConfig::from_json_str("{ not json"),
            Err(Error::ConfigError(_))
        ));
    }
}
