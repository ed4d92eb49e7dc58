use super::BlockRepository;
use crate::context::RequestContext;
use crate::error::Result;
use crate::keyed::KeyedCache;
use crate::model::{Account, Visibility, VisibilityKey};
use crate::repository::RepositoryAdapter;
use crate::storage::{BlockStorage, Storage};
use std::future::Future;

/// Memoized account visibility, derived from blocks in both directions.
///
/// Decisions are reset by the block cache whenever a block between the two
/// accounts is stored or invalidated.
#[derive(Clone)]
pub struct VisibilityFilter<B, A> {
    cache: KeyedCache<Visibility>,
    blocks: BlockRepository<B, A>,
}

impl<B: BlockStorage, A: Storage<Account>> VisibilityFilter<B, A> {
    pub fn new(cache: KeyedCache<Visibility>, blocks: BlockRepository<B, A>) -> Self {
        VisibilityFilter { cache, blocks }
    }

    /// Whether `requester_id` may see `target_id`'s account.
    pub async fn account_visible(
        &self,
        ctx: &RequestContext,
        requester_id: &str,
        target_id: &str,
    ) -> Result<bool> {
        if requester_id == target_id {
            return Ok(true);
        }
        let visibility = self
            .get(ctx, &VisibilityKey::pair(requester_id, target_id))
            .await?;
        Ok(visibility.visible)
    }
}

impl<B: BlockStorage, A: Storage<Account>> RepositoryAdapter<Visibility>
    for VisibilityFilter<B, A>
{
    fn cache(&self) -> &KeyedCache<Visibility> {
        &self.cache
    }

    fn fetch(
        &self,
        ctx: &RequestContext,
        key: &VisibilityKey,
    ) -> impl Future<Output = Result<Visibility>> + Send + 'static {
        let blocks = self.blocks.clone();
        let ctx = ctx.barebones();
        let key = key.clone();
        async move {
            let VisibilityKey::RequesterIdTargetId {
                requester_id,
                target_id,
            } = &key;
            blocks
                .is_either_blocked(&ctx, requester_id, target_id)
                .await
                .map(|blocked| Visibility::new(requester_id, target_id, !blocked))
        }
    }
}
