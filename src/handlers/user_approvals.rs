use super::accounts::register_addresses;
use super::context::HandlerContext;
use super::messages::MsgUpdateUserApprovals;
use super::transfer::load_collection;
use crate::model::docs::BalanceDoc;
use crate::model::ids::{balance_doc_id, is_reserved_address};
use anyhow::{ensure, Result};

/// Replaces the flagged approval groups of one user's balance document.
pub async fn handle_update_user_approvals(
    ctx: &mut HandlerContext<'_>,
    msg: MsgUpdateUserApprovals,
) -> Result<()> {
    ensure!(
        !is_reserved_address(&msg.creator),
        "reserved address {} cannot hold approvals",
        msg.creator
    );
    register_addresses(ctx, &[msg.creator.as_str()]).await?;

    let collection = load_collection(ctx, msg.collection_id).await?;
    let id = balance_doc_id(msg.collection_id, &msg.creator);
    ctx.cache
        .fetch_if_empty::<BalanceDoc>(ctx.store, std::slice::from_ref(&id))
        .await?;

    let mut doc = ctx
        .cache
        .get::<BalanceDoc>(&id)
        .cloned()
        .unwrap_or_else(|| BalanceDoc::seeded(&collection, msg.creator.as_str()));

    msg.outgoing_approvals.apply_to(&mut doc.outgoing_approvals);
    msg.incoming_approvals.apply_to(&mut doc.incoming_approvals);
    msg.auto_approve_self_initiated_outgoing_transfers
        .apply_to(&mut doc.auto_approve_self_initiated_outgoing_transfers);
    msg.auto_approve_self_initiated_incoming_transfers
        .apply_to(&mut doc.auto_approve_self_initiated_incoming_transfers);
    msg.user_permissions.apply_to(&mut doc.user_permissions);
    doc.update_history.push(ctx.tx.history());

    ctx.cache.put(doc)?;
    Ok(())
}
