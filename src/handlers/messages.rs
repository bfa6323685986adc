//! Decoded transaction messages. Partial-update messages arrive as
//! `updateX` flag plus value pairs and are turned into [`FieldUpdate`]s here,
//! so handlers never see a value without knowing whether it applies.

use crate::chain::Coin;
use crate::model::balance::Balance;
use crate::model::timeline::{
    BadgeMetadataTimeline, CollectionApproval, CollectionMetadataTimeline, CustomDataTimeline,
    IsArchivedTimeline, ManagerTimeline, OffChainBalancesMetadataTimeline, StandardsTimeline,
};
use crate::model::uint_range::deserialize_uint;
use crate::model::update::FieldUpdate;
use serde::Deserialize;
use serde_json::Value;

pub const UNIVERSAL_UPDATE_COLLECTION: &str = "/badges.MsgUniversalUpdateCollection";
pub const DELETE_COLLECTION: &str = "/badges.MsgDeleteCollection";
pub const TRANSFER_BADGES: &str = "/badges.MsgTransferBadges";
pub const UPDATE_USER_APPROVALS: &str = "/badges.MsgUpdateUserApprovals";
pub const CREATE_ADDRESS_LISTS: &str = "/badges.MsgCreateAddressLists";
pub const BANK_SEND: &str = "/cosmos.bank.v1beta1.MsgSend";

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("message of type {type_url} is malformed: {source}")]
    Malformed {
        type_url: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "@type")]
pub enum ChainMsg {
    #[serde(rename = "/badges.MsgUniversalUpdateCollection")]
    UniversalUpdateCollection(MsgUniversalUpdateCollection),
    #[serde(rename = "/badges.MsgDeleteCollection")]
    DeleteCollection(MsgDeleteCollection),
    #[serde(rename = "/badges.MsgTransferBadges")]
    TransferBadges(MsgTransferBadges),
    #[serde(rename = "/badges.MsgUpdateUserApprovals")]
    UpdateUserApprovals(MsgUpdateUserApprovals),
    #[serde(rename = "/badges.MsgCreateAddressLists")]
    CreateAddressLists(MsgCreateAddressLists),
    #[serde(rename = "/cosmos.bank.v1beta1.MsgSend")]
    BankSend(MsgSend),
    /// Any message type this indexer does not track.
    #[serde(other)]
    Unrecognized,
}

impl ChainMsg {
    pub fn decode(raw: &Value) -> Result<Self, MessageError> {
        serde_json::from_value(raw.clone()).map_err(|source| MessageError::Malformed {
            type_url: raw
                .get("@type")
                .and_then(Value::as_str)
                .unwrap_or("<missing>")
                .to_string(),
            source,
        })
    }

    pub fn type_url(&self) -> &'static str {
        match self {
            ChainMsg::UniversalUpdateCollection(_) => UNIVERSAL_UPDATE_COLLECTION,
            ChainMsg::DeleteCollection(_) => DELETE_COLLECTION,
            ChainMsg::TransferBadges(_) => TRANSFER_BADGES,
            ChainMsg::UpdateUserApprovals(_) => UPDATE_USER_APPROVALS,
            ChainMsg::CreateAddressLists(_) => CREATE_ADDRESS_LISTS,
            ChainMsg::BankSend(_) => BANK_SEND,
            ChainMsg::Unrecognized => "unrecognized",
        }
    }
}

/// Creates a collection when `collection_id` is 0, otherwise updates it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "UniversalUpdateWire")]
pub struct MsgUniversalUpdateCollection {
    pub creator: String,
    pub collection_id: u64,
    pub balances_type: String,
    pub default_balances: Vec<Balance>,
    pub badges_to_create: Vec<Balance>,
    pub collection_permissions: FieldUpdate<Value>,
    pub manager_timeline: FieldUpdate<Vec<ManagerTimeline>>,
    pub collection_metadata_timeline: FieldUpdate<Vec<CollectionMetadataTimeline>>,
    pub badge_metadata_timeline: FieldUpdate<Vec<BadgeMetadataTimeline>>,
    pub off_chain_balances_metadata_timeline: FieldUpdate<Vec<OffChainBalancesMetadataTimeline>>,
    pub custom_data_timeline: FieldUpdate<Vec<CustomDataTimeline>>,
    pub collection_approvals: FieldUpdate<Vec<CollectionApproval>>,
    pub standards_timeline: FieldUpdate<Vec<StandardsTimeline>>,
    pub is_archived_timeline: FieldUpdate<Vec<IsArchivedTimeline>>,
}

impl MsgUniversalUpdateCollection {
    pub fn is_create(&self) -> bool {
        self.collection_id == 0
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UniversalUpdateWire {
    creator: String,
    #[serde(deserialize_with = "deserialize_uint")]
    collection_id: u64,
    balances_type: String,
    default_balances: Vec<Balance>,
    badges_to_create: Vec<Balance>,
    update_collection_permissions: bool,
    collection_permissions: Value,
    update_manager_timeline: bool,
    manager_timeline: Vec<ManagerTimeline>,
    update_collection_metadata_timeline: bool,
    collection_metadata_timeline: Vec<CollectionMetadataTimeline>,
    update_badge_metadata_timeline: bool,
    badge_metadata_timeline: Vec<BadgeMetadataTimeline>,
    update_off_chain_balances_metadata_timeline: bool,
    off_chain_balances_metadata_timeline: Vec<OffChainBalancesMetadataTimeline>,
    update_custom_data_timeline: bool,
    custom_data_timeline: Vec<CustomDataTimeline>,
    update_collection_approvals: bool,
    collection_approvals: Vec<CollectionApproval>,
    update_standards_timeline: bool,
    standards_timeline: Vec<StandardsTimeline>,
    update_is_archived_timeline: bool,
    is_archived_timeline: Vec<IsArchivedTimeline>,
}

impl From<UniversalUpdateWire> for MsgUniversalUpdateCollection {
    fn from(wire: UniversalUpdateWire) -> Self {
        Self {
            creator: wire.creator,
            collection_id: wire.collection_id,
            balances_type: wire.balances_type,
            default_balances: wire.default_balances,
            badges_to_create: wire.badges_to_create,
            collection_permissions: FieldUpdate::from_flag(
                wire.update_collection_permissions,
                wire.collection_permissions,
            ),
            manager_timeline: FieldUpdate::from_flag(
                wire.update_manager_timeline,
                wire.manager_timeline,
            ),
            collection_metadata_timeline: FieldUpdate::from_flag(
                wire.update_collection_metadata_timeline,
                wire.collection_metadata_timeline,
            ),
            badge_metadata_timeline: FieldUpdate::from_flag(
                wire.update_badge_metadata_timeline,
                wire.badge_metadata_timeline,
            ),
            off_chain_balances_metadata_timeline: FieldUpdate::from_flag(
                wire.update_off_chain_balances_metadata_timeline,
                wire.off_chain_balances_metadata_timeline,
            ),
            custom_data_timeline: FieldUpdate::from_flag(
                wire.update_custom_data_timeline,
                wire.custom_data_timeline,
            ),
            collection_approvals: FieldUpdate::from_flag(
                wire.update_collection_approvals,
                wire.collection_approvals,
            ),
            standards_timeline: FieldUpdate::from_flag(
                wire.update_standards_timeline,
                wire.standards_timeline,
            ),
            is_archived_timeline: FieldUpdate::from_flag(
                wire.update_is_archived_timeline,
                wire.is_archived_timeline,
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MsgDeleteCollection {
    #[serde(default)]
    pub creator: String,
    #[serde(deserialize_with = "deserialize_uint")]
    pub collection_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub from: String,
    #[serde(default)]
    pub to_addresses: Vec<String>,
    #[serde(default)]
    pub balances: Vec<Balance>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MsgTransferBadges {
    #[serde(default)]
    pub creator: String,
    #[serde(deserialize_with = "deserialize_uint")]
    pub collection_id: u64,
    #[serde(default)]
    pub transfers: Vec<Transfer>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "UpdateUserApprovalsWire")]
pub struct MsgUpdateUserApprovals {
    pub creator: String,
    pub collection_id: u64,
    pub outgoing_approvals: FieldUpdate<Vec<Value>>,
    pub incoming_approvals: FieldUpdate<Vec<Value>>,
    pub auto_approve_self_initiated_outgoing_transfers: FieldUpdate<bool>,
    pub auto_approve_self_initiated_incoming_transfers: FieldUpdate<bool>,
    pub user_permissions: FieldUpdate<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UpdateUserApprovalsWire {
    creator: String,
    #[serde(deserialize_with = "deserialize_uint")]
    collection_id: u64,
    update_outgoing_approvals: bool,
    outgoing_approvals: Vec<Value>,
    update_incoming_approvals: bool,
    incoming_approvals: Vec<Value>,
    update_auto_approve_self_initiated_outgoing_transfers: bool,
    auto_approve_self_initiated_outgoing_transfers: bool,
    update_auto_approve_self_initiated_incoming_transfers: bool,
    auto_approve_self_initiated_incoming_transfers: bool,
    update_user_permissions: bool,
    user_permissions: Value,
}

impl From<UpdateUserApprovalsWire> for MsgUpdateUserApprovals {
    fn from(wire: UpdateUserApprovalsWire) -> Self {
        Self {
            creator: wire.creator,
            collection_id: wire.collection_id,
            outgoing_approvals: FieldUpdate::from_flag(
                wire.update_outgoing_approvals,
                wire.outgoing_approvals,
            ),
            incoming_approvals: FieldUpdate::from_flag(
                wire.update_incoming_approvals,
                wire.incoming_approvals,
            ),
            auto_approve_self_initiated_outgoing_transfers: FieldUpdate::from_flag(
                wire.update_auto_approve_self_initiated_outgoing_transfers,
                wire.auto_approve_self_initiated_outgoing_transfers,
            ),
            auto_approve_self_initiated_incoming_transfers: FieldUpdate::from_flag(
                wire.update_auto_approve_self_initiated_incoming_transfers,
                wire.auto_approve_self_initiated_incoming_transfers,
            ),
            user_permissions: FieldUpdate::from_flag(
                wire.update_user_permissions,
                wire.user_permissions,
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressListInput {
    pub list_id: String,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub whitelist: bool,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub custom_data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MsgCreateAddressLists {
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub address_lists: Vec<AddressListInput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MsgSend {
    pub from_address: String,
    pub to_address: String,
    #[serde(default)]
    pub amount: Vec<Coin>,
}
