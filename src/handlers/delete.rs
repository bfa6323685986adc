use super::context::HandlerContext;
use super::messages::MsgDeleteCollection;
use crate::cache::CachedDoc;
use crate::model::docs::{
    ApprovalTrackerDoc, BalanceDoc, CollectionDoc, MerkleChallengeDoc, RefreshDoc,
};
use crate::model::ids::collection_doc_id;
use anyhow::{Context, Result};
use tracing::info;

/// Deletes a collection with its balances, trackers and challenges,
/// including documents only created earlier in the same batch.
pub async fn handle_delete_collection(
    ctx: &mut HandlerContext<'_>,
    msg: MsgDeleteCollection,
) -> Result<()> {
    let collection_id = msg.collection_id;
    let id = collection_doc_id(collection_id);

    ctx.cache.delete::<CollectionDoc>(&id);
    ctx.cache.delete::<RefreshDoc>(&id);

    let balances = cascade::<BalanceDoc>(ctx, collection_id).await?;
    let trackers = cascade::<ApprovalTrackerDoc>(ctx, collection_id).await?;
    let challenges = cascade::<MerkleChallengeDoc>(ctx, collection_id).await?;

    info!(
        collection_id,
        balances,
        trackers,
        challenges,
        height = ctx.tx.height,
        "collection deleted"
    );
    Ok(())
}

async fn cascade<T: CachedDoc>(ctx: &mut HandlerContext<'_>, collection_id: u64) -> Result<usize> {
    let stored = ctx
        .store
        .ids_for_collection(T::KIND, collection_id)
        .await
        .with_context(|| format!("failed to list {} for collection {collection_id}", T::KIND))?;
    for id in &stored {
        ctx.cache.delete::<T>(id);
    }
    ctx.cache.purge_collection::<T>(collection_id);
    Ok(stored.len())
}
