use super::accounts::register_addresses;
use super::address_lists::handle_create_address_lists;
use super::collection::handle_universal_update;
use super::context::HandlerContext;
use super::delete::handle_delete_collection;
use super::messages::ChainMsg;
use super::transfer::handle_transfer_badges;
use super::user_approvals::handle_update_user_approvals;
use anyhow::{Context, Result};
use tracing::trace;

/// Routes decoded messages to their handlers.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageDispatcher;

impl MessageDispatcher {
    pub fn new() -> Self {
        Self
    }

    /// Returns `false` when the message type is not tracked.
    pub async fn dispatch(&self, ctx: &mut HandlerContext<'_>, msg: ChainMsg) -> Result<bool> {
        let type_url = msg.type_url();
        match msg {
            ChainMsg::UniversalUpdateCollection(msg) => handle_universal_update(ctx, msg).await,
            ChainMsg::DeleteCollection(msg) => handle_delete_collection(ctx, msg).await,
            ChainMsg::TransferBadges(msg) => handle_transfer_badges(ctx, msg).await,
            ChainMsg::UpdateUserApprovals(msg) => handle_update_user_approvals(ctx, msg).await,
            ChainMsg::CreateAddressLists(msg) => handle_create_address_lists(ctx, msg).await,
            ChainMsg::BankSend(msg) => {
                register_addresses(ctx, &[msg.from_address, msg.to_address])
                    .await
                    .map(|_| ())
            }
            ChainMsg::Unrecognized => {
                trace!(tx_hash = %ctx.tx.hash, "ignoring unrecognized message");
                return Ok(false);
            }
        }
        .with_context(|| format!("{type_url} handler failed in tx {}", ctx.tx.hash))?;
        Ok(true)
    }
}
