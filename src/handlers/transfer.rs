use super::accounts::register_addresses;
use super::context::HandlerContext;
use super::messages::{MsgTransferBadges, Transfer};
use crate::model::balance::{add_balances, scale_balances, subtract_balances};
use crate::model::docs::{ActivityDoc, ActivityOrigin, BalanceDoc, CollectionDoc};
use crate::model::ids::{balance_doc_id, collection_doc_id, onchain_activity_id, MINT_ADDRESS};
use anyhow::{anyhow, ensure, Context, Result};
use std::collections::BTreeMap;
use tracing::debug;

/// Balances are not computed from the message; the emitted transfer event
/// carries the post-execution result. The message only registers addresses
/// and warms the cache for the event pass.
pub async fn handle_transfer_badges(
    ctx: &mut HandlerContext<'_>,
    msg: MsgTransferBadges,
) -> Result<()> {
    let mut addresses = vec![msg.creator.clone()];
    for transfer in &msg.transfers {
        addresses.push(transfer.from.clone());
        addresses.extend(transfer.to_addresses.iter().cloned());
    }
    register_addresses(ctx, &addresses).await?;

    let collection_id = msg.collection_id;
    load_collection(ctx, collection_id).await?;

    let mut ids: Vec<String> = addresses
        .iter()
        .map(|address| balance_doc_id(collection_id, address))
        .collect();
    ids.push(balance_doc_id(collection_id, MINT_ADDRESS));
    ids.sort();
    ids.dedup();
    ctx.cache.fetch_if_empty::<BalanceDoc>(ctx.store, &ids).await?;

    debug!(
        collection_id,
        transfers = msg.transfers.len(),
        tx_hash = %ctx.tx.hash,
        "transfer message observed"
    );
    Ok(())
}

/// Moves `transfer.balances` from the sender to every recipient and records
/// one activity entry. `ordinal` distinguishes several transfers of one tx
/// so a replayed block produces the same activity id.
pub async fn apply_transfer(
    ctx: &mut HandlerContext<'_>,
    collection_id: u64,
    transfer: &Transfer,
    ordinal: &str,
) -> Result<()> {
    ensure!(
        !transfer.to_addresses.is_empty(),
        "transfer in collection {collection_id} has no recipients"
    );
    let collection = load_collection(ctx, collection_id).await?;

    let from = if transfer.from.is_empty() {
        MINT_ADDRESS
    } else {
        transfer.from.as_str()
    };
    let mut ids = vec![balance_doc_id(collection_id, from)];
    ids.extend(
        transfer
            .to_addresses
            .iter()
            .map(|address| balance_doc_id(collection_id, address)),
    );
    ids.sort();
    ids.dedup();
    ctx.cache.fetch_if_empty::<BalanceDoc>(ctx.store, &ids).await?;

    let recipients = u64::try_from(transfer.to_addresses.len())?;
    let outgoing = scale_balances(&transfer.balances, recipients)
        .with_context(|| format!("transfer amount overflow in collection {collection_id}"))?;

    // Work on copies so a failing recipient leaves the cache untouched.
    let mut working: BTreeMap<String, BalanceDoc> = BTreeMap::new();
    let mut sender = ctx
        .cache
        .get::<BalanceDoc>(&balance_doc_id(collection_id, from))
        .cloned()
        .unwrap_or_else(|| BalanceDoc::seeded(&collection, from));
    sender.balances = subtract_balances(&sender.balances, &outgoing)
        .with_context(|| format!("{from} cannot cover transfer in collection {collection_id}"))?;
    working.insert(from.to_string(), sender);

    for address in &transfer.to_addresses {
        let mut recipient = match working.remove(address) {
            Some(doc) => doc,
            None => ctx
                .cache
                .get::<BalanceDoc>(&balance_doc_id(collection_id, address))
                .cloned()
                .unwrap_or_else(|| BalanceDoc::seeded(&collection, address.as_str())),
        };
        recipient.balances = add_balances(&recipient.balances, &transfer.balances)
            .with_context(|| format!("{address} balance overflow in collection {collection_id}"))?;
        working.insert(address.clone(), recipient);
    }

    for (_, mut doc) in working {
        doc.update_history.push(ctx.tx.history());
        ctx.cache.put(doc)?;
    }

    ctx.cache.record_activity(ActivityDoc {
        id: onchain_activity_id(ctx.tx.height, &ctx.tx.hash, ordinal),
        collection_id,
        from: from.to_string(),
        to: transfer.to_addresses.clone(),
        balances: transfer.balances.clone(),
        block: ctx.tx.height,
        timestamp: ctx.tx.timestamp,
        tx_hash: Some(ctx.tx.hash.clone()),
        origin: ActivityOrigin::OnChain,
    });
    Ok(())
}

pub(crate) async fn load_collection(
    ctx: &mut HandlerContext<'_>,
    collection_id: u64,
) -> Result<CollectionDoc> {
    let id = collection_doc_id(collection_id);
    ctx.cache
        .fetch_if_empty::<CollectionDoc>(ctx.store, std::slice::from_ref(&id))
        .await?;
    ctx.cache
        .get::<CollectionDoc>(&id)
        .cloned()
        .ok_or_else(|| anyhow!("collection {collection_id} does not exist"))
}
