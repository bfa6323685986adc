use super::context::HandlerContext;
use crate::model::docs::AccountDoc;
use crate::model::ids::is_account_address;
use anyhow::Result;

/// Records addresses seen for the first time. Non-account strings (Mint,
/// list ids) are ignored.
pub async fn register_addresses<S: AsRef<str>>(
    ctx: &mut HandlerContext<'_>,
    addresses: &[S],
) -> Result<usize> {
    let mut ids: Vec<String> = addresses
        .iter()
        .map(|address| address.as_ref())
        .filter(|address| is_account_address(address))
        .map(str::to_string)
        .collect();
    ids.sort();
    ids.dedup();
    if ids.is_empty() {
        return Ok(0);
    }

    ctx.cache.fetch_if_empty::<AccountDoc>(ctx.store, &ids).await?;

    let mut registered = 0;
    for address in ids {
        if ctx.cache.get::<AccountDoc>(&address).is_some() {
            continue;
        }
        ctx.cache.put(AccountDoc {
            address,
            first_seen_block: ctx.tx.height,
            airdrop_tx_hash: None,
        })?;
        registered += 1;
    }
    Ok(registered)
}
