use super::{finish_delete, AccountRepository};
use crate::context::RequestContext;
use crate::entity::CacheEntity;
use crate::error::Result;
use crate::keyed::KeyedCache;
use crate::model::{Account, Block, BlockKey};
use crate::repository::RepositoryAdapter;
use crate::storage::{BlockStorage, Storage};
use std::future::Future;

/// Cached block lookups and writes. Blocks hydrate both accounts.
#[derive(Clone)]
pub struct BlockRepository<S, A> {
    cache: KeyedCache<Block>,
    storage: S,
    accounts: AccountRepository<A>,
}

impl<S: BlockStorage, A: Storage<Account>> BlockRepository<S, A> {
    pub fn new(cache: KeyedCache<Block>, storage: S, accounts: AccountRepository<A>) -> Self {
        BlockRepository {
            cache,
            storage,
            accounts,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub async fn get_block_by_id(&self, ctx: &RequestContext, id: &str) -> Result<Block> {
        self.get(ctx, &BlockKey::Id(id.to_string())).await
    }

    pub async fn get_block_by_uri(&self, ctx: &RequestContext, uri: &str) -> Result<Block> {
        self.get(ctx, &BlockKey::Uri(uri.to_string())).await
    }

    /// The block `account_id` placed on `target_account_id`, if any.
    pub async fn get_block(
        &self,
        ctx: &RequestContext,
        account_id: &str,
        target_account_id: &str,
    ) -> Result<Block> {
        self.get(ctx, &BlockKey::pair(account_id, target_account_id))
            .await
    }

    /// Whether `source_account_id` blocks `target_account_id`.
    pub async fn is_blocked(
        &self,
        ctx: &RequestContext,
        source_account_id: &str,
        target_account_id: &str,
    ) -> Result<bool> {
        match self
            .get_block(&ctx.barebones(), source_account_id, target_account_id)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Whether either account blocks the other.
    pub async fn is_either_blocked(
        &self,
        ctx: &RequestContext,
        account_id_1: &str,
        account_id_2: &str,
    ) -> Result<bool> {
        if self.is_blocked(ctx, account_id_1, account_id_2).await? {
            return Ok(true);
        }
        self.is_blocked(ctx, account_id_2, account_id_1).await
    }

    pub async fn put_block(&self, ctx: &RequestContext, block: &Block) -> Result<()> {
        self.cache
            .store(block, || self.storage.insert(ctx, block))
            .await
    }

    /// Delete a block. Deleting an unknown block succeeds.
    pub async fn delete_block_by_id(&self, ctx: &RequestContext, id: &str) -> Result<()> {
        self.delete_by(ctx, BlockKey::Id(id.to_string())).await
    }

    /// Delete a block. Deleting an unknown block succeeds.
    pub async fn delete_block_by_uri(&self, ctx: &RequestContext, uri: &str) -> Result<()> {
        self.delete_by(ctx, BlockKey::Uri(uri.to_string())).await
    }

    async fn delete_by(&self, ctx: &RequestContext, key: BlockKey) -> Result<()> {
        // read it first so invalidation listeners see the row
        let block = match self.get(&ctx.barebones(), &key).await {
            Ok(block) => block,
            Err(e) => {
                self.cache.invalidate(&key);
                return if e.is_not_found() { Ok(()) } else { Err(e) };
            }
        };

        let res = self.storage.delete(ctx, &block.id).await;
        let outcome = self.cache.invalidate_value(&key, &block);
        finish_delete(res, &key, outcome)
    }

    /// Delete every block `account_id` created or is the target of.
    ///
    /// # Errors
    ///
    /// The first storage error, or `Error::ListenerError` if the rows were
    /// deleted but a dependent cache could not be reset.
    pub async fn delete_account_blocks(
        &self,
        ctx: &RequestContext,
        account_id: &str,
    ) -> Result<()> {
        let ids = self.storage.block_ids_involving(ctx, account_id).await?;
        if ids.is_empty() {
            return Ok(());
        }

        let barebones = ctx.barebones();
        let mut blocks = Vec::with_capacity(ids.len());
        let mut res = Ok(());
        for id in &ids {
            match self.get_block_by_id(&barebones, id).await {
                Ok(block) => blocks.push(block),
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    res = Err(e);
                    break;
                }
            }
        }

        if res.is_ok() {
            for block in &blocks {
                if let Err(e) = self.storage.delete(ctx, &block.id).await {
                    res = Err(e.with_context(Block::cache_prefix(), &block.id));
                    break;
                }
            }
        }

        let mut listener_error = None;
        for block in &blocks {
            let outcome = self
                .cache
                .invalidate_value(&BlockKey::Id(block.id.clone()), block);
            if listener_error.is_none() {
                listener_error = outcome.errors.into_iter().next();
            }
        }
        if res.is_err() {
            // ids that failed to load may still be cached
            for id in &ids {
                self.cache.invalidate(&BlockKey::Id(id.clone()));
            }
            return res;
        }

        debug!("Deleted {} blocks involving account {}", blocks.len(), account_id);
        match listener_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<S: BlockStorage, A: Storage<Account>> RepositoryAdapter<Block> for BlockRepository<S, A> {
    fn cache(&self) -> &KeyedCache<Block> {
        &self.cache
    }

    fn fetch(
        &self,
        ctx: &RequestContext,
        key: &BlockKey,
    ) -> impl Future<Output = Result<Block>> + Send + 'static {
        let storage = self.storage.clone();
        let ctx = ctx.clone();
        let key = key.clone();
        async move { storage.select(&ctx, &key).await }
    }

    async fn hydrate(&self, ctx: &RequestContext, block: &mut Block) -> Result<()> {
        let barebones = ctx.barebones();
        if block.account.is_none() {
            let account = self
                .accounts
                .get_account_by_id(&barebones, &block.account_id)
                .await?;
            block.account = Some(account);
        }
        if block.target_account.is_none() {
            let target = self
                .accounts
                .get_account_by_id(&barebones, &block.target_account_id)
                .await?;
            block.target_account = Some(target);
        }
        Ok(())
    }
}
