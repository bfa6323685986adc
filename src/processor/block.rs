//! Replays one block's transactions into a [`DocsCache`].

use crate::cache::DocsCache;
use crate::chain::{ChainBlock, ChainTx, TxBody};
use crate::events::{EventProcessor, EventReport};
use crate::handlers::messages::ChainMsg;
use crate::handlers::{HandlerContext, MessageDispatcher, TxInfo};
use crate::model::docs::BlockPosition;
use crate::queue::QueuePolicy;
use crate::store::DocumentStore;
use anyhow::{Context, Result};
use tracing::{debug, warn};

pub const DEFAULT_GAS_WINDOW: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockReport {
    pub height: u64,
    pub txs: usize,
    pub applied_txs: usize,
    pub skipped_txs: usize,
    pub messages: usize,
    pub unrecognized_messages: usize,
    pub events: EventReport,
}

impl BlockReport {
    pub fn is_empty(&self) -> bool {
        self.txs == 0
    }
}

/// Applies each transaction in block order: messages first, then the
/// execution events. Failed or undecodable transactions are skipped whole;
/// a handler error aborts the block.
#[derive(Debug, Clone)]
pub struct BlockProcessor {
    dispatcher: MessageDispatcher,
    events: EventProcessor,
    policy: QueuePolicy,
    gas_window: usize,
}

impl BlockProcessor {
    pub fn new(policy: QueuePolicy, gas_window: usize) -> Self {
        Self {
            dispatcher: MessageDispatcher::new(),
            events: EventProcessor::new(),
            policy,
            gas_window,
        }
    }

    pub fn policy(&self) -> &QueuePolicy {
        &self.policy
    }

    /// The cache must already hold the status document.
    pub async fn process(
        &self,
        cache: &mut DocsCache,
        store: &dyn DocumentStore,
        block: &ChainBlock,
    ) -> Result<BlockReport> {
        let mut report = BlockReport {
            height: block.height,
            txs: block.txs.len(),
            ..BlockReport::default()
        };

        for tx in &block.txs {
            let Some(messages) = decode_messages(block.height, tx) else {
                report.skipped_txs += 1;
                continue;
            };

            cache.status_mut()?.block = BlockPosition {
                height: block.height,
                tx_index: tx.index,
                timestamp: block.timestamp,
            };

            let info = TxInfo {
                height: block.height,
                timestamp: block.timestamp,
                hash: tx.hash.clone(),
                index: tx.index,
            };
            let mut ctx = HandlerContext::new(cache, store, &info, &self.policy);
            for msg in messages {
                report.messages += 1;
                if !self.dispatcher.dispatch(&mut ctx, msg).await? {
                    report.unrecognized_messages += 1;
                }
            }

            let events = self.events.process(&mut ctx, &tx.events).await;
            report.events.applied += events.applied;
            report.events.skipped += events.skipped;
            report.events.unrecognized += events.unrecognized;

            if let Some(price) = tx.gas_price() {
                cache.status_mut()?.gas.record(price, self.gas_window);
            }
            report.applied_txs += 1;
        }

        cache.status_mut().context("status must be loaded before processing a block")?.block =
            BlockPosition {
                height: block.height,
                tx_index: 0,
                timestamp: block.timestamp,
            };

        debug!(
            height = block.height,
            txs = report.txs,
            applied = report.applied_txs,
            skipped = report.skipped_txs,
            events = report.events.applied,
            "processed block"
        );
        Ok(report)
    }
}

/// `None` when the transaction should be skipped: it failed on chain, its
/// bytes did not decode, or any of its messages is malformed.
fn decode_messages(height: u64, tx: &ChainTx) -> Option<Vec<ChainMsg>> {
    if !tx.succeeded() {
        debug!(height, tx_hash = %tx.hash, code = tx.code, "skipping failed transaction");
        return None;
    }
    let decoded = match &tx.body {
        TxBody::Decoded(decoded) => decoded,
        TxBody::Malformed(reason) => {
            warn!(height, tx_hash = %tx.hash, reason, "skipping undecodable transaction");
            return None;
        }
    };

    let mut messages = Vec::with_capacity(decoded.messages.len());
    for raw in &decoded.messages {
        match ChainMsg::decode(raw) {
            Ok(msg) => messages.push(msg),
            Err(err) => {
                warn!(height, tx_hash = %tx.hash, error = %err, "skipping transaction with malformed message");
                return None;
            }
        }
    }
    Some(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{Coin, DecodedTx, EventAttribute, TxEvent};
    use crate::handlers::messages::{BANK_SEND, DELETE_COLLECTION, UNIVERSAL_UPDATE_COLLECTION};
    use crate::model::docs::StatusDoc;
    use crate::model::ids::collection_doc_id;
    use crate::store::{DocKind, MemoryStore};
    use serde_json::{json, Value};

    const ALICE: &str = "cosmos1qypqxpq9qcrsszg2pvxq6rs0zqg3yyc5lzv7xu";
    const BOB: &str = "cosmos1xqcrsszg2pvxq6rs0zqg3yyc5lzv7xuqypqxpq9";

    fn chain_tx(index: u64, code: u32, messages: Vec<Value>, events: Vec<TxEvent>) -> ChainTx {
        ChainTx {
            index,
            hash: format!("{index:064X}"),
            code,
            log: String::new(),
            gas_wanted: 200_000,
            gas_used: 150_000,
            body: TxBody::Decoded(DecodedTx {
                messages,
                fee: vec![Coin {
                    denom: "ubadge".into(),
                    amount: 400_000,
                }],
                gas_limit: 200_000,
            }),
            events,
        }
    }

    fn create_collection() -> Value {
        json!({
            "@type": UNIVERSAL_UPDATE_COLLECTION,
            "creator": ALICE,
            "collectionId": "0",
            "balancesType": "Standard",
            "badgesToCreate": [{"amount": "10", "badgeIds": [{"start": "1", "end": "1"}], "ownershipTimes": [{"start": "1", "end": "18446744073709551615"}]}]
        })
    }

    async fn process(store: &MemoryStore, block: &ChainBlock) -> (Result<BlockReport>, DocsCache) {
        let mut cache = DocsCache::with_status(StatusDoc::genesis());
        let processor = BlockProcessor::new(QueuePolicy::default(), 3);
        let result = processor.process(&mut cache, store, block).await;
        (result, cache)
    }

    #[tokio::test]
    async fn skips_failed_and_malformed_transactions() {
        let store = MemoryStore::new();
        let mut malformed = chain_tx(2, 0, vec![], vec![]);
        malformed.body = TxBody::Malformed("bad bytes".into());
        let block = ChainBlock {
            height: 7,
            timestamp: 1_000,
            txs: vec![
                chain_tx(0, 5, vec![create_collection()], vec![]),
                chain_tx(1, 0, vec![json!({"@type": DELETE_COLLECTION, "collectionId": "x"})], vec![]),
                malformed,
                chain_tx(3, 0, vec![json!({"@type": BANK_SEND, "from_address": ALICE, "to_address": BOB})], vec![]),
            ],
        };

        let (result, cache) = process(&store, &block).await;
        let report = result.unwrap();
        assert_eq!(report.txs, 4);
        assert_eq!(report.skipped_txs, 3);
        assert_eq!(report.applied_txs, 1);

        let status = cache.status().unwrap();
        assert_eq!(status.block.height, 7);
        assert_eq!(status.block.tx_index, 0);
        assert_eq!(status.next_collection_id, 1);
        assert_eq!(status.gas.recent.len(), 1);
        assert!((status.gas.average - 2.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn messages_run_before_events_of_the_same_tx() {
        let store = MemoryStore::new();
        let usage = TxEvent {
            kind: "approval".into(),
            attributes: [
                ("collectionId", "1"),
                ("approvalLevel", "collection"),
                ("approverAddress", ""),
                ("approvalId", "claim"),
                ("amountTrackerId", "t"),
                ("trackerType", "overall"),
                ("approvedAddress", ""),
                ("amounts", "[]"),
                ("numTransfers", "1"),
            ]
            .into_iter()
            .map(|(key, value)| EventAttribute {
                key: key.into(),
                value: value.into(),
            })
            .collect(),
        };
        let block = ChainBlock {
            height: 3,
            timestamp: 9_000,
            txs: vec![chain_tx(0, 0, vec![create_collection()], vec![usage])],
        };

        let (result, cache) = process(&store, &block).await;
        let report = result.unwrap();
        assert_eq!(report.messages, 1);
        assert_eq!(report.events.applied, 1);
        assert_eq!(cache.status().unwrap().next_collection_id, 2);
        assert!(cache
            .get::<crate::model::docs::CollectionDoc>(&collection_doc_id(1))
            .is_some());
        assert_eq!(store.count(DocKind::Collections), 0);
    }

    #[tokio::test]
    async fn handler_errors_abort_the_block() {
        let store = MemoryStore::new();
        let block = ChainBlock {
            height: 4,
            timestamp: 0,
            txs: vec![chain_tx(
                0,
                0,
                vec![json!({"@type": UNIVERSAL_UPDATE_COLLECTION, "creator": ALICE, "collectionId": "42"})],
                vec![],
            )],
        };
        let (result, _) = process(&store, &block).await;
        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains(UNIVERSAL_UPDATE_COLLECTION));
    }

    #[tokio::test]
    async fn empty_blocks_only_move_the_cursor() {
        let store = MemoryStore::new();
        let block = ChainBlock {
            height: 12,
            timestamp: 5,
            txs: Vec::new(),
        };
        let (result, cache) = process(&store, &block).await;
        assert!(result.unwrap().is_empty());
        assert!(!cache.has_pending_writes());
        assert_eq!(cache.status().unwrap().block.timestamp, 5);
    }
}
