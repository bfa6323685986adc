use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::balance::Balance;
use super::ids::{
    balance_doc_id, collection_doc_id, MINT_ADDRESS, STATUS_DOC_ID, TOTAL_ADDRESS,
};
use super::timeline::{
    BadgeMetadataTimeline, CollectionApproval, CollectionMetadataTimeline, CustomDataTimeline,
    IsArchivedTimeline, ManagerTimeline, OffChainBalancesMetadataTimeline, StandardsTimeline,
};
use super::uint_range::{sort_and_merge, UintRange};

/// Position of the indexer in the chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockPosition {
    pub height: u64,
    pub tx_index: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasPriceStats {
    pub recent: VecDeque<f64>,
    pub average: f64,
}

impl GasPriceStats {
    /// Pushes a sample into the rolling window and refreshes the average.
    pub fn record(&mut self, price: f64, window: usize) {
        if !price.is_finite() || price < 0.0 || window == 0 {
            return;
        }
        self.recent.push_back(price);
        while self.recent.len() > window {
            self.recent.pop_front();
        }
        self.average = self.recent.iter().sum::<f64>() / self.recent.len() as f64;
    }
}

/// Singleton progress record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDoc {
    pub block: BlockPosition,
    pub next_collection_id: u64,
    #[serde(default)]
    pub gas: GasPriceStats,
}

impl StatusDoc {
    pub fn genesis() -> Self {
        Self {
            block: BlockPosition::default(),
            next_collection_id: 1,
            gas: GasPriceStats::default(),
        }
    }

    pub fn doc_id(&self) -> String {
        STATUS_DOC_ID.to_string()
    }
}

/// Record of the block and tx that last touched a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateHistory {
    pub block: u64,
    pub block_timestamp: u64,
    pub tx_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDoc {
    pub collection_id: u64,
    pub created_by: String,
    pub created_block: u64,
    pub created_timestamp: u64,
    pub balances_type: String,
    #[serde(default)]
    pub default_balances: Vec<Balance>,
    #[serde(default)]
    pub manager_timeline: Vec<ManagerTimeline>,
    #[serde(default)]
    pub collection_metadata_timeline: Vec<CollectionMetadataTimeline>,
    #[serde(default)]
    pub badge_metadata_timeline: Vec<BadgeMetadataTimeline>,
    #[serde(default)]
    pub off_chain_balances_metadata_timeline: Vec<OffChainBalancesMetadataTimeline>,
    #[serde(default)]
    pub custom_data_timeline: Vec<CustomDataTimeline>,
    #[serde(default)]
    pub standards_timeline: Vec<StandardsTimeline>,
    #[serde(default)]
    pub is_archived_timeline: Vec<IsArchivedTimeline>,
    #[serde(default)]
    pub collection_approvals: Vec<CollectionApproval>,
    #[serde(default)]
    pub collection_permissions: serde_json::Value,
    #[serde(default)]
    pub update_history: Vec<UpdateHistory>,
}

pub const OFF_CHAIN_BALANCES_PREFIX: &str = "Off-Chain";

impl CollectionDoc {
    pub fn new(
        collection_id: u64,
        created_by: impl Into<String>,
        balances_type: impl Into<String>,
        history: UpdateHistory,
    ) -> Self {
        Self {
            collection_id,
            created_by: created_by.into(),
            created_block: history.block,
            created_timestamp: history.block_timestamp,
            balances_type: balances_type.into(),
            default_balances: Vec::new(),
            manager_timeline: Vec::new(),
            collection_metadata_timeline: Vec::new(),
            badge_metadata_timeline: Vec::new(),
            off_chain_balances_metadata_timeline: Vec::new(),
            custom_data_timeline: Vec::new(),
            standards_timeline: Vec::new(),
            is_archived_timeline: Vec::new(),
            collection_approvals: Vec::new(),
            collection_permissions: serde_json::Value::Null,
            update_history: vec![history],
        }
    }

    pub fn doc_id(&self) -> String {
        collection_doc_id(self.collection_id)
    }

    pub fn has_off_chain_balances(&self) -> bool {
        self.balances_type.starts_with(OFF_CHAIN_BALANCES_PREFIX)
    }
}

/// Freshness of off-chain balance content folded into a reservoir document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OffChainSync {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub content_hash: Option<String>,
    pub fetched_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceDoc {
    pub collection_id: u64,
    pub address: String,
    #[serde(default)]
    pub balances: Vec<Balance>,
    #[serde(default)]
    pub outgoing_approvals: Vec<serde_json::Value>,
    #[serde(default)]
    pub incoming_approvals: Vec<serde_json::Value>,
    #[serde(default)]
    pub auto_approve_self_initiated_outgoing_transfers: bool,
    #[serde(default)]
    pub auto_approve_self_initiated_incoming_transfers: bool,
    #[serde(default)]
    pub user_permissions: serde_json::Value,
    #[serde(default)]
    pub off_chain: Option<OffChainSync>,
    #[serde(default)]
    pub update_history: Vec<UpdateHistory>,
}

impl BalanceDoc {
    pub fn empty(collection_id: u64, address: impl Into<String>) -> Self {
        Self {
            collection_id,
            address: address.into(),
            balances: Vec::new(),
            outgoing_approvals: Vec::new(),
            incoming_approvals: Vec::new(),
            auto_approve_self_initiated_outgoing_transfers: false,
            auto_approve_self_initiated_incoming_transfers: false,
            user_permissions: serde_json::Value::Null,
            off_chain: None,
            update_history: Vec::new(),
        }
    }

    /// First document for a user, seeded from the collection's defaults.
    pub fn seeded(collection: &CollectionDoc, address: impl Into<String>) -> Self {
        Self {
            balances: collection.default_balances.clone(),
            ..Self::empty(collection.collection_id, address)
        }
    }

    pub fn mint(collection_id: u64) -> Self {
        Self::empty(collection_id, MINT_ADDRESS)
    }

    pub fn total(collection_id: u64) -> Self {
        Self::empty(collection_id, TOTAL_ADDRESS)
    }

    pub fn doc_id(&self) -> String {
        balance_doc_id(self.collection_id, &self.address)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FetchKind {
    CollectionMetadata,
    BadgeMetadata,
    Balances,
}

impl FetchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchKind::CollectionMetadata => "collectionMetadata",
            FetchKind::BadgeMetadata => "badgeMetadata",
            FetchKind::Balances => "balances",
        }
    }
}

/// Pending fetch of off-chain content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDoc {
    pub id: String,
    pub uri: String,
    pub kind: FetchKind,
    pub collection_id: u64,
    pub load_balance_id: u32,
    pub refresh_requested_at: u64,
    pub created_at: u64,
    #[serde(default)]
    pub retries: u32,
    pub next_fetch_time: u64,
    #[serde(default)]
    pub deleted_at: Option<u64>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl QueueDoc {
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshDoc {
    pub collection_id: u64,
    pub refresh_requested_at: u64,
}

impl RefreshDoc {
    pub fn doc_id(&self) -> String {
        collection_doc_id(self.collection_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalTrackerDoc {
    pub id: String,
    pub collection_id: u64,
    pub approval_level: String,
    pub approver_address: String,
    pub approval_id: String,
    pub amount_tracker_id: String,
    pub tracker_type: String,
    pub approved_address: String,
    #[serde(default)]
    pub amounts: Vec<Balance>,
    #[serde(default)]
    pub num_transfers: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerkleChallengeDoc {
    pub id: String,
    pub collection_id: u64,
    pub approval_level: String,
    pub approver_address: String,
    pub approval_id: String,
    pub challenge_tracker_id: String,
    #[serde(default)]
    pub used_leaf_indices: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivityOrigin {
    OnChain,
    OffChainReconcile,
}

/// Append-only record of a balance movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityDoc {
    pub id: String,
    pub collection_id: u64,
    pub from: String,
    pub to: Vec<String>,
    pub balances: Vec<Balance>,
    pub block: u64,
    pub timestamp: u64,
    #[serde(default)]
    pub tx_hash: Option<String>,
    pub origin: ActivityOrigin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressListDoc {
    pub list_id: String,
    pub addresses: Vec<String>,
    pub whitelist: bool,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub custom_data: String,
    pub created_by: String,
    pub created_block: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDoc {
    pub address: String,
    pub first_seen_block: u64,
    #[serde(default)]
    pub airdrop_tx_hash: Option<String>,
}

impl AccountDoc {
    pub fn airdropped(&self) -> bool {
        self.airdrop_tx_hash.is_some()
    }
}

/// Cached off-chain content keyed by URI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchDoc {
    pub uri: String,
    pub content: serde_json::Value,
    pub content_hash: String,
    pub fetched_at: u64,
    pub permanent: bool,
}

/// Persisted processing failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDoc {
    pub id: String,
    pub context: String,
    pub error: String,
    #[serde(default)]
    pub height: Option<u64>,
    pub timestamp: u64,
}

/// Heights known to carry no transactions, stored as merged intervals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmptyBlocksDoc {
    pub ranges: Vec<UintRange>,
}

impl EmptyBlocksDoc {
    pub fn merge(&mut self, ranges: impl IntoIterator<Item = UintRange>) {
        let mut all = std::mem::take(&mut self.ranges);
        all.extend(ranges);
        self.ranges = sort_and_merge(all);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gas_window_keeps_most_recent_samples() {
        let mut stats = GasPriceStats::default();
        for price in [1.0, 2.0, 3.0, 4.0] {
            stats.record(price, 3);
        }
        assert_eq!(stats.recent, VecDeque::from(vec![2.0, 3.0, 4.0]));
        assert!((stats.average - 3.0).abs() < f64::EPSILON);

        stats.record(f64::NAN, 3);
        assert_eq!(stats.recent.len(), 3);
    }

    #[test]
    fn empty_block_ranges_merge() {
        let mut doc = EmptyBlocksDoc::default();
        doc.merge([UintRange::new(1, 5)]);
        doc.merge([UintRange::new(6, 10), UintRange::new(20, 20)]);
        assert_eq!(
            doc.ranges,
            vec![UintRange::new(1, 10), UintRange::new(20, 20)]
        );
    }

    #[test]
    fn seeded_balance_doc_copies_defaults() {
        let mut collection = CollectionDoc::new(
            3,
            "creator",
            "Standard",
            UpdateHistory {
                block: 1,
                block_timestamp: 10,
                tx_hash: "AA".into(),
            },
        );
        collection.default_balances = vec![Balance::new(1, vec![UintRange::new(1, 1)], vec![UintRange::FULL])];

        let doc = BalanceDoc::seeded(&collection, "addr");
        assert_eq!(doc.doc_id(), "3:addr");
        assert_eq!(doc.balances, collection.default_balances);
    }
}
