//! Document id conventions.

pub const MINT_ADDRESS: &str = "Mint";
pub const TOTAL_ADDRESS: &str = "Total";

pub const STATUS_DOC_ID: &str = "status";
pub const EMPTY_BLOCKS_DOC_ID: &str = "emptyBlocks";

const BECH32_CHARSET: &str = "qpzry9x8gf2tvdw0s3jn54khce6mua7l";

pub fn collection_doc_id(collection_id: u64) -> String {
    collection_id.to_string()
}

pub fn balance_doc_id(collection_id: u64, address: &str) -> String {
    format!("{collection_id}:{address}")
}

/// Splits `{collectionId}:{address}` back into its parts.
pub fn parse_balance_doc_id(id: &str) -> Option<(u64, &str)> {
    let (collection, address) = id.split_once(':')?;
    Some((collection.parse().ok()?, address))
}

/// Key identifying one approval tracker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackerKey<'a> {
    pub collection_id: u64,
    pub approval_level: &'a str,
    pub approver_address: &'a str,
    pub approval_id: &'a str,
    pub tracker_id: &'a str,
    pub tracker_type: &'a str,
    pub approved_address: &'a str,
}

impl TrackerKey<'_> {
    pub fn doc_id(&self) -> String {
        format!(
            "{}:{}-{}-{}-{}-{}-{}",
            self.collection_id,
            self.approval_level,
            self.approver_address,
            self.approval_id,
            self.tracker_id,
            self.tracker_type,
            self.approved_address
        )
    }
}

pub fn merkle_challenge_doc_id(
    collection_id: u64,
    approval_level: &str,
    approver_address: &str,
    approval_id: &str,
    challenge_tracker_id: &str,
) -> String {
    format!("{collection_id}:{approval_level}-{approver_address}-{approval_id}-{challenge_tracker_id}")
}

pub fn onchain_activity_id(height: u64, tx_hash: &str, ordinal: &str) -> String {
    format!("{height}:{tx_hash}:{ordinal}")
}

/// `run_id` is fresh per reconciliation, so a payload that returns to an
/// earlier state still records its own transfers.
pub fn reconcile_activity_id(collection_id: u64, run_id: &str, address: &str) -> String {
    format!("{collection_id}:{run_id}:{address}")
}

pub fn is_reserved_address(address: &str) -> bool {
    address == MINT_ADDRESS || address == TOTAL_ADDRESS
}

/// Accepts bech32 account addresses and 0x-prefixed 20 byte hex addresses.
pub fn is_account_address(address: &str) -> bool {
    if let Some(hex) = address.strip_prefix("0x") {
        return hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit());
    }

    let Some((hrp, data)) = address.rsplit_once('1') else {
        return false;
    };
    !hrp.is_empty()
        && hrp.chars().all(|c| c.is_ascii_lowercase())
        && data.len() >= 38
        && address.len() <= 90
        && data.chars().all(|c| BECH32_CHARSET.contains(c))
}
