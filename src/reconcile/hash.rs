use crate::model::balance::{normalize_balances, Balance};
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Off-chain balances payload: address or address-list id to balances.
pub type BalancesMap = BTreeMap<String, Vec<Balance>>;

/// Drops entries that hold nothing and normalizes the rest, so two payloads
/// describing the same holdings hash identically.
pub fn canonicalize(map: &BalancesMap) -> BalancesMap {
    map.iter()
        .map(|(key, balances)| (key.clone(), normalize_balances(balances)))
        .filter(|(_, balances)| !balances.is_empty())
        .collect()
}

/// Hex sha256 of the canonical JSON encoding.
pub fn content_hash(map: &BalancesMap) -> Result<String> {
    let encoded = serde_json::to_vec(&canonicalize(map)).context("failed to encode balances map")?;
    Ok(hex::encode(Sha256::digest(&encoded)))
}

/// Parses a fetched payload as a balances map.
pub fn parse_balances_map(payload: &serde_json::Value) -> Result<BalancesMap> {
    serde_json::from_value(payload.clone()).context("payload is not a balances map")
}
