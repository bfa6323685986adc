use super::accounts::register_addresses;
use super::context::HandlerContext;
use super::messages::MsgUniversalUpdateCollection;
use crate::model::balance::add_balances;
use crate::model::docs::{BalanceDoc, CollectionDoc};
use crate::model::ids::{balance_doc_id, collection_doc_id, MINT_ADDRESS, TOTAL_ADDRESS};
use crate::queue::{collection_fetch_requests, enqueue_if_stale, request_refresh};
use anyhow::{bail, Context, Result};
use tracing::{debug, info};

/// Creates or updates a collection. Only field groups whose flag is set are
/// replaced; every call appends to the update history.
pub async fn handle_universal_update(
    ctx: &mut HandlerContext<'_>,
    msg: MsgUniversalUpdateCollection,
) -> Result<()> {
    register_addresses(ctx, &[msg.creator.as_str()]).await?;

    let creating = msg.is_create();
    let collection_id = if creating {
        let status = ctx.cache.status_mut()?;
        let assigned = status.next_collection_id;
        status.next_collection_id += 1;
        assigned
    } else {
        msg.collection_id
    };

    let id = collection_doc_id(collection_id);
    ctx.cache
        .fetch_if_empty::<CollectionDoc>(ctx.store, std::slice::from_ref(&id))
        .await?;

    let mut collection = match (ctx.cache.get::<CollectionDoc>(&id).cloned(), creating) {
        (Some(_), true) => bail!("collection {collection_id} already exists"),
        (None, false) => bail!("collection {collection_id} does not exist"),
        (Some(mut existing), false) => {
            existing.update_history.push(ctx.tx.history());
            existing
        }
        (None, true) => {
            let mut created = CollectionDoc::new(
                collection_id,
                msg.creator.clone(),
                msg.balances_type.clone(),
                ctx.tx.history(),
            );
            created.default_balances = msg.default_balances.clone();
            info!(collection_id, creator = %msg.creator, height = ctx.tx.height, "collection created");
            created
        }
    };

    let metadata_changed = msg.collection_metadata_timeline.is_replace()
        || msg.badge_metadata_timeline.is_replace();
    let balances_changed = msg.off_chain_balances_metadata_timeline.is_replace();
    let badges_to_create = msg.badges_to_create.clone();
    apply_field_updates(&mut collection, msg);

    if !badges_to_create.is_empty() {
        grow_supply(ctx, collection_id, &badges_to_create).await?;
    }

    if creating || metadata_changed || balances_changed {
        request_refresh(
            ctx.cache,
            ctx.store,
            collection_id,
            ctx.tx.timestamp,
            ctx.policy.refresh_min_interval,
            true,
        )
        .await?;

        for request in collection_fetch_requests(&collection, ctx.tx.timestamp) {
            let queued = enqueue_if_stale(
                ctx.cache,
                ctx.store,
                ctx.policy.partitions,
                ctx.tx.entropy(),
                &request,
                ctx.tx.timestamp,
            )
            .await?;
            if let Some(queue_id) = queued {
                debug!(collection_id, uri = %request.uri, %queue_id, "queued off-chain fetch");
            }
        }
    }

    ctx.cache.put(collection)?;
    Ok(())
}

fn apply_field_updates(collection: &mut CollectionDoc, msg: MsgUniversalUpdateCollection) {
    msg.collection_permissions
        .apply_to(&mut collection.collection_permissions);
    msg.manager_timeline.apply_to(&mut collection.manager_timeline);
    msg.collection_metadata_timeline
        .apply_to(&mut collection.collection_metadata_timeline);
    msg.badge_metadata_timeline
        .apply_to(&mut collection.badge_metadata_timeline);
    msg.off_chain_balances_metadata_timeline
        .apply_to(&mut collection.off_chain_balances_metadata_timeline);
    msg.custom_data_timeline
        .apply_to(&mut collection.custom_data_timeline);
    msg.collection_approvals
        .apply_to(&mut collection.collection_approvals);
    msg.standards_timeline
        .apply_to(&mut collection.standards_timeline);
    msg.is_archived_timeline
        .apply_to(&mut collection.is_archived_timeline);
}

/// New supply lands in both reservoirs so Mint + holders still equals Total.
async fn grow_supply(
    ctx: &mut HandlerContext<'_>,
    collection_id: u64,
    badges: &[crate::model::balance::Balance],
) -> Result<()> {
    for address in [MINT_ADDRESS, TOTAL_ADDRESS] {
        let id = balance_doc_id(collection_id, address);
        ctx.cache
            .fetch_if_empty::<BalanceDoc>(ctx.store, std::slice::from_ref(&id))
            .await?;
        let mut doc = ctx
            .cache
            .get::<BalanceDoc>(&id)
            .cloned()
            .unwrap_or_else(|| BalanceDoc::empty(collection_id, address));
        doc.balances = add_balances(&doc.balances, badges)
            .with_context(|| format!("supply overflow for collection {collection_id}"))?;
        doc.update_history.push(ctx.tx.history());
        ctx.cache.put(doc)?;
    }
    Ok(())
}
