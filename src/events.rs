//! Post-execution event pass. Runs after a transaction's messages have been
//! dispatched and applies the facts only the executed transaction knows:
//! tracker totals, consumed leaves and the final transfer balances.

pub mod apply;
pub mod decode;

use crate::chain::TxEvent;
use crate::handlers::{apply_transfer, HandlerContext};
pub use decode::{ApprovalUsage, ChainEvent, ChallengeUsage, EventDecodeError, TransferEvent};
use tracing::warn;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventReport {
    pub applied: usize,
    pub skipped: usize,
    pub unrecognized: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EventProcessor;

impl EventProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Applies every recognised event. A bad event is logged and skipped so
    /// one malformed log entry cannot stall indexing.
    pub async fn process(&self, ctx: &mut HandlerContext<'_>, events: &[TxEvent]) -> EventReport {
        let mut report = EventReport::default();
        for (position, event) in events.iter().enumerate() {
            let decoded = match ChainEvent::decode(event) {
                Ok(decoded) => decoded,
                Err(err) => {
                    warn!(tx_hash = %ctx.tx.hash, position, error = %err, "skipping undecodable event");
                    report.skipped += 1;
                    continue;
                }
            };

            let result = match decoded {
                ChainEvent::ApprovalUsage(usage) => apply::apply_approval_usage(ctx, usage).await,
                ChainEvent::ChallengeUsage(usage) => apply::apply_challenge_usage(ctx, usage).await,
                ChainEvent::Transfer(TransferEvent {
                    collection_id,
                    transfer,
                }) => {
                    let ordinal = format!("e{position}");
                    apply_transfer(ctx, collection_id, &transfer, &ordinal).await
                }
                ChainEvent::Unrecognized => {
                    report.unrecognized += 1;
                    continue;
                }
            };

            match result {
                Ok(()) => report.applied += 1,
                Err(err) => {
                    warn!(
                        tx_hash = %ctx.tx.hash,
                        position,
                        kind = %event.kind,
                        error = %format!("{err:#}"),
                        "skipping event that failed to apply"
                    );
                    report.skipped += 1;
                }
            }
        }
        report
    }
}
