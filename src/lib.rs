//! # keyed-cache
//!
//! An in-process, multi-index entity cache for a federated social server.
//!
//! ## Features
//!
//! - **Multi-Index:** An entity is reachable under every natural key it has
//!   (ID, URI, email, account pair, ...) the moment it is loaded through any one
//! - **Single-Flight:** Concurrent misses for the same key share one backend read
//! - **Cascading Invalidation:** Removing an entity notifies listeners that reset
//!   dependent caches before the call returns
//! - **Bounded:** Per-cache TTL and capacity, enforced by a background sweep
//! - **Type Safe:** Lookup names are closed enums, never strings
//!
//! ## Quick Start
//!
//! ```
//! use keyed_cache::config::CachesConfig;
//! use keyed_cache::db::{InMemoryDatabase, NewSignup};
//! use keyed_cache::RequestContext;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> keyed_cache::Result<()> {
//! let db = InMemoryDatabase::in_memory(&CachesConfig::default(), "example.org")?;
//! let ctx = RequestContext::new();
//!
//! let user = db
//!     .admin
//!     .new_signup(
//!         &ctx,
//!         NewSignup {
//!             username: "alice".into(),
//!             email: "alice@example.org".into(),
//!             email_verified: true,
//!             ..Default::default()
//!         },
//!     )
//!     .await?;
//!
//! // served from the cache, no storage read
//! let again = db.users.get_user_by_email_address(&ctx, "alice@example.org").await?;
//! assert_eq!(again.id, user.id);
//! assert_eq!(db.users.storage().selects(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Layout
//!
//! - [`KeyedCache`]: one entity type, indexed by all of its keys
//! - [`singleflight`]: per-key load coordination
//! - [`invalidation`]: listener registry behind cascades
//! - [`RepositoryAdapter`]: cached `get` + hydration over a [`storage::Storage`]
//! - [`db`]: repositories for accounts, users, blocks and visibility
//! - [`Caches`]: the cache set with its cascades wired

#[macro_use]
extern crate log;

pub mod caches;
pub mod config;
pub mod context;
pub mod db;
pub mod entity;
pub mod error;
pub mod invalidation;
pub mod key;
pub mod keyed;
pub mod model;
pub mod observability;
pub mod repository;
pub mod serialization;
pub mod singleflight;
pub mod storage;
pub mod sweeper;

// Re-exports for convenience
pub use caches::Caches;
pub use config::{CacheConfig, CachesConfig};
pub use context::RequestContext;
pub use entity::CacheEntity;
pub use error::{Error, Result};
pub use invalidation::ListenerScope;
pub use key::CacheKey;
pub use keyed::{CacheStats, Invalidation, KeyedCache, SweepStats};
pub use repository::RepositoryAdapter;
pub use singleflight::{FlightRole, SingleFlightGroup};
pub use sweeper::Sweeper;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
