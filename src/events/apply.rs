use super::decode::{ApprovalUsage, ChallengeUsage};
use crate::handlers::HandlerContext;
use crate::model::docs::{ApprovalTrackerDoc, MerkleChallengeDoc};
use crate::model::ids::{merkle_challenge_doc_id, TrackerKey};
use anyhow::Result;

/// Sets the tracker to the emitted totals. The event already carries the
/// cumulative values, so a replayed block writes the same document.
pub async fn apply_approval_usage(ctx: &mut HandlerContext<'_>, usage: ApprovalUsage) -> Result<()> {
    let approval = &usage.approval;
    let id = TrackerKey {
        collection_id: approval.collection_id,
        approval_level: &approval.approval_level,
        approver_address: &approval.approver_address,
        approval_id: &approval.approval_id,
        tracker_id: &usage.tracker_id,
        tracker_type: &usage.tracker_type,
        approved_address: &usage.approved_address,
    }
    .doc_id();

    ctx.cache
        .fetch_if_empty::<ApprovalTrackerDoc>(ctx.store, std::slice::from_ref(&id))
        .await?;

    let mut tracker = ctx
        .cache
        .get::<ApprovalTrackerDoc>(&id)
        .cloned()
        .unwrap_or_else(|| ApprovalTrackerDoc {
            id: id.clone(),
            collection_id: approval.collection_id,
            approval_level: approval.approval_level.clone(),
            approver_address: approval.approver_address.clone(),
            approval_id: approval.approval_id.clone(),
            amount_tracker_id: usage.tracker_id.clone(),
            tracker_type: usage.tracker_type.clone(),
            approved_address: usage.approved_address.clone(),
            amounts: Vec::new(),
            num_transfers: 0,
        });
    tracker.amounts = usage.amounts;
    tracker.num_transfers = usage.num_transfers;
    ctx.cache.put(tracker)?;
    Ok(())
}

/// Records a consumed leaf. Leaves are only ever appended.
pub async fn apply_challenge_usage(
    ctx: &mut HandlerContext<'_>,
    usage: ChallengeUsage,
) -> Result<()> {
    let approval = &usage.approval;
    let id = merkle_challenge_doc_id(
        approval.collection_id,
        &approval.approval_level,
        &approval.approver_address,
        &approval.approval_id,
        &usage.challenge_tracker_id,
    );

    ctx.cache
        .fetch_if_empty::<MerkleChallengeDoc>(ctx.store, std::slice::from_ref(&id))
        .await?;

    let mut challenge = ctx
        .cache
        .get::<MerkleChallengeDoc>(&id)
        .cloned()
        .unwrap_or_else(|| MerkleChallengeDoc {
            id: id.clone(),
            collection_id: approval.collection_id,
            approval_level: approval.approval_level.clone(),
            approver_address: approval.approver_address.clone(),
            approval_id: approval.approval_id.clone(),
            challenge_tracker_id: usage.challenge_tracker_id.clone(),
            used_leaf_indices: Vec::new(),
        });
    if challenge.used_leaf_indices.contains(&usage.leaf_index) {
        return Ok(());
    }
    challenge.used_leaf_indices.push(usage.leaf_index);
    ctx.cache.put(challenge)?;
    Ok(())
}
