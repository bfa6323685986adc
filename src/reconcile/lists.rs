use super::hash::BalancesMap;
use super::ReconcileError;
use crate::cache::DocsCache;
use crate::model::balance::{add_balances, Balance};
use crate::model::docs::AddressListDoc;
use crate::model::ids::{is_account_address, is_reserved_address};
use crate::store::DocumentStore;
use std::collections::BTreeMap;

/// List ids that only make sense when evaluated on chain.
pub fn is_on_chain_list_id(list_id: &str) -> bool {
    is_reserved_address(list_id)
        || matches!(list_id, "All" | "None")
        || list_id.starts_with("AllWith")
        || list_id.starts_with('!')
        || list_id.contains(':')
}

/// Resolves every key of the payload to concrete addresses. Addresses named
/// more than once accumulate their balances.
pub(crate) async fn expand_recipients(
    cache: &mut DocsCache,
    store: &dyn DocumentStore,
    map: &BalancesMap,
    max_addresses: usize,
) -> Result<BTreeMap<String, Vec<Balance>>, ReconcileError> {
    let list_ids: Vec<String> = map
        .keys()
        .filter(|key| !is_account_address(key))
        .cloned()
        .collect();

    if let Some(reserved) = list_ids.iter().find(|id| is_on_chain_list_id(id)) {
        return Err(ReconcileError::ReservedList(reserved.clone()));
    }
    cache
        .fetch_if_empty::<AddressListDoc>(store, &list_ids)
        .await?;

    let mut recipients: BTreeMap<String, Vec<Balance>> = BTreeMap::new();
    for (key, balances) in map {
        let addresses: Vec<String> = if is_account_address(key) {
            vec![key.clone()]
        } else {
            let list = cache
                .get::<AddressListDoc>(key)
                .ok_or_else(|| ReconcileError::UnknownList(key.clone()))?;
            if !list.whitelist {
                return Err(ReconcileError::Blacklist(key.clone()));
            }
            list.addresses
                .iter()
                .filter(|address| is_account_address(address))
                .cloned()
                .collect()
        };

        for address in addresses {
            let held = recipients.entry(address.clone()).or_default();
            *held = add_balances(held, balances)
                .map_err(|source| ReconcileError::Conservation { address, source })?;
        }

        if recipients.len() > max_addresses {
            return Err(ReconcileError::TooManyAddresses {
                count: recipients.len(),
                cap: max_addresses,
            });
        }
    }

    Ok(recipients)
}
