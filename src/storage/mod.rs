//! Storage abstraction: the durable rows the caches mirror.
//!
//! The [`Storage`] trait decouples the caches from a specific database. Every
//! call receives the [`RequestContext`] and must honor its deadline; absent
//! rows are reported as `Error::NotFound`, anything else as
//! `Error::StorageError`.
//!
//! Methods return `Send` futures so loads can be shared between tasks by the
//! single-flight group.

use crate::context::RequestContext;
use crate::entity::CacheEntity;
use crate::error::Result;
use crate::model::Block;
use std::future::Future;

#[cfg(feature = "inmemory")]
mod inmemory;

#[cfg(feature = "inmemory")]
pub use inmemory::InMemoryStorage;

/// Row access for one entity type.
pub trait Storage<T: CacheEntity>: Clone + Send + Sync + 'static {
    /// Fetch the row matching `key`.
    ///
    /// # Errors
    /// `Error::NotFound` if no row matches.
    fn select(&self, ctx: &RequestContext, key: &T::Key) -> impl Future<Output = Result<T>> + Send;

    /// Insert a new row.
    ///
    /// # Errors
    /// `Error::StorageError` if the row violates a unique constraint.
    fn insert(&self, ctx: &RequestContext, value: &T) -> impl Future<Output = Result<()>> + Send;

    /// Overwrite `columns` of the existing row for `value`.
    ///
    /// # Errors
    /// `Error::NotFound` if there is no row with `value`'s id.
    fn update(
        &self,
        ctx: &RequestContext,
        value: &T,
        columns: &[&str],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Delete the row with `id`. Deleting an absent row succeeds.
    fn delete(&self, ctx: &RequestContext, id: &T::Id) -> impl Future<Output = Result<()>> + Send;

    /// Every row in the table, in no particular order.
    fn select_all(&self, ctx: &RequestContext) -> impl Future<Output = Result<Vec<T>>> + Send;
}

/// Block rows additionally support scans by participant.
pub trait BlockStorage: Storage<Block> {
    /// IDs of every block `account_id` created or is the target of.
    fn block_ids_involving(
        &self,
        ctx: &RequestContext,
        account_id: &str,
    ) -> impl Future<Output = Result<Vec<String>>> + Send;
}
