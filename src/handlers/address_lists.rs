use super::accounts::register_addresses;
use super::context::HandlerContext;
use super::messages::MsgCreateAddressLists;
use crate::model::docs::AddressListDoc;
use crate::reconcile::lists::is_on_chain_list_id;
use anyhow::Result;
use tracing::{debug, warn};

/// Stores new address lists. Lists are immutable once created, so an id
/// that already exists is left alone.
pub async fn handle_create_address_lists(
    ctx: &mut HandlerContext<'_>,
    msg: MsgCreateAddressLists,
) -> Result<()> {
    let ids: Vec<String> = msg
        .address_lists
        .iter()
        .map(|list| list.list_id.clone())
        .collect();
    ctx.cache
        .fetch_if_empty::<AddressListDoc>(ctx.store, &ids)
        .await?;

    let mut seen = vec![msg.creator.clone()];
    for list in msg.address_lists {
        if is_on_chain_list_id(&list.list_id) {
            warn!(list_id = %list.list_id, tx_hash = %ctx.tx.hash, "reserved list id ignored");
            continue;
        }
        if ctx.cache.get::<AddressListDoc>(&list.list_id).is_some() {
            debug!(list_id = %list.list_id, "address list already exists");
            continue;
        }
        seen.extend(list.addresses.iter().cloned());
        ctx.cache.put(AddressListDoc {
            list_id: list.list_id,
            addresses: list.addresses,
            whitelist: list.whitelist,
            uri: list.uri,
            custom_data: list.custom_data,
            created_by: msg.creator.clone(),
            created_block: ctx.tx.height,
        })?;
    }

    register_addresses(ctx, &seen).await?;
    Ok(())
}
