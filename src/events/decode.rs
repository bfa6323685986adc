//! Classifies emitted events by the attributes they carry.

use crate::chain::TxEvent;
use crate::handlers::Transfer;
use crate::model::balance::Balance;
use crate::model::uint_range::parse_uint_or_zero;
use serde::de::DeserializeOwned;

pub const COLLECTION_ID: &str = "collectionId";
pub const AMOUNT_TRACKER_ID: &str = "amountTrackerId";
pub const CHALLENGE_TRACKER_ID: &str = "challengeTrackerId";
pub const TRANSFER_FROM: &str = "from";
pub const TRANSFER_TO: &str = "to";
pub const TRANSFER_BALANCES: &str = "balances";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventDecodeError {
    #[error("event {event} is missing attribute {key}")]
    MissingAttribute { event: String, key: &'static str },
    #[error("event {event} has an invalid {key}: {reason}")]
    InvalidAttribute {
        event: String,
        key: &'static str,
        reason: String,
    },
}

/// Identity shared by tracker-style events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRef {
    pub collection_id: u64,
    pub approval_level: String,
    pub approver_address: String,
    pub approval_id: String,
}

/// Post-execution totals of an approval's amount tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalUsage {
    pub approval: ApprovalRef,
    pub tracker_id: String,
    pub tracker_type: String,
    pub approved_address: String,
    pub amounts: Vec<Balance>,
    pub num_transfers: u64,
}

/// A Merkle leaf consumed by a claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeUsage {
    pub approval: ApprovalRef,
    pub challenge_tracker_id: String,
    pub leaf_index: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub collection_id: u64,
    pub transfer: Transfer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    ApprovalUsage(ApprovalUsage),
    ChallengeUsage(ChallengeUsage),
    Transfer(TransferEvent),
    Unrecognized,
}

impl ChainEvent {
    /// Tracker events are recognised before transfers: a usage event may
    /// also repeat the transfer parties.
    pub fn decode(event: &TxEvent) -> Result<Self, EventDecodeError> {
        if event.attribute(AMOUNT_TRACKER_ID).is_some() {
            return decode_approval_usage(event).map(ChainEvent::ApprovalUsage);
        }
        if event.attribute(CHALLENGE_TRACKER_ID).is_some() {
            return decode_challenge_usage(event).map(ChainEvent::ChallengeUsage);
        }
        let is_transfer = [COLLECTION_ID, TRANSFER_FROM, TRANSFER_TO, TRANSFER_BALANCES]
            .iter()
            .all(|key| event.attribute(key).is_some());
        if is_transfer {
            return decode_transfer(event).map(ChainEvent::Transfer);
        }
        Ok(ChainEvent::Unrecognized)
    }
}

fn decode_approval_usage(event: &TxEvent) -> Result<ApprovalUsage, EventDecodeError> {
    Ok(ApprovalUsage {
        approval: approval_ref(event)?,
        tracker_id: text(event, AMOUNT_TRACKER_ID),
        tracker_type: text(event, "trackerType"),
        approved_address: text(event, "approvedAddress"),
        amounts: json_or_default(event, "amounts")?,
        num_transfers: number_or_zero(event, "numTransfers")?,
    })
}

fn decode_challenge_usage(event: &TxEvent) -> Result<ChallengeUsage, EventDecodeError> {
    let raw = event
        .attribute("leafIndex")
        .ok_or_else(|| missing(event, "leafIndex"))?;
    let leaf_index = raw
        .trim()
        .parse()
        .map_err(|err: std::num::ParseIntError| invalid(event, "leafIndex", err.to_string()))?;
    Ok(ChallengeUsage {
        approval: approval_ref(event)?,
        challenge_tracker_id: text(event, CHALLENGE_TRACKER_ID),
        leaf_index,
    })
}

fn decode_transfer(event: &TxEvent) -> Result<TransferEvent, EventDecodeError> {
    let collection_id = required_number(event, COLLECTION_ID)?;
    let to_addresses: Vec<String> = json_or_default(event, TRANSFER_TO)?;
    let balances: Vec<Balance> = json_or_default(event, TRANSFER_BALANCES)?;
    Ok(TransferEvent {
        collection_id,
        transfer: Transfer {
            from: text(event, TRANSFER_FROM),
            to_addresses,
            balances,
        },
    })
}

fn approval_ref(event: &TxEvent) -> Result<ApprovalRef, EventDecodeError> {
    Ok(ApprovalRef {
        collection_id: required_number(event, COLLECTION_ID)?,
        approval_level: text(event, "approvalLevel"),
        approver_address: text(event, "approverAddress"),
        approval_id: text(event, "approvalId"),
    })
}

fn text(event: &TxEvent, key: &str) -> String {
    event.attribute(key).unwrap_or_default().to_string()
}

fn required_number(event: &TxEvent, key: &'static str) -> Result<u64, EventDecodeError> {
    let raw = event.attribute(key).ok_or_else(|| missing(event, key))?;
    raw.trim()
        .parse()
        .map_err(|err: std::num::ParseIntError| invalid(event, key, err.to_string()))
}

/// Missing, empty and `"null"` all read as zero.
fn number_or_zero(event: &TxEvent, key: &'static str) -> Result<u64, EventDecodeError> {
    match event.attribute(key) {
        None => Ok(0),
        Some(raw) => parse_uint_or_zero(raw).map_err(|reason| invalid(event, key, reason)),
    }
}

fn json_or_default<T: DeserializeOwned + Default>(
    event: &TxEvent,
    key: &'static str,
) -> Result<T, EventDecodeError> {
    match event.attribute(key).map(str::trim) {
        None | Some("") | Some("null") => Ok(T::default()),
        Some(raw) => {
            serde_json::from_str(raw).map_err(|err| invalid(event, key, err.to_string()))
        }
    }
}

fn missing(event: &TxEvent, key: &'static str) -> EventDecodeError {
    EventDecodeError::MissingAttribute {
        event: event.kind.clone(),
        key,
    }
}

fn invalid(event: &TxEvent, key: &'static str, reason: String) -> EventDecodeError {
    EventDecodeError::InvalidAttribute {
        event: event.kind.clone(),
        key,
        reason,
    }
}
