use crate::cache::DocsCache;
use crate::model::docs::UpdateHistory;
use crate::queue::{QueueEntropy, QueuePolicy};
use crate::store::DocumentStore;

/// Identity of the transaction being replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInfo {
    pub height: u64,
    /// Block time in unix milliseconds.
    pub timestamp: u64,
    pub hash: String,
    pub index: u64,
}

impl TxInfo {
    pub fn history(&self) -> UpdateHistory {
        UpdateHistory {
            block: self.height,
            block_timestamp: self.timestamp,
            tx_hash: self.hash.clone(),
        }
    }

    pub fn entropy(&self) -> QueueEntropy<'_> {
        QueueEntropy::Block {
            height: self.height,
            tx_hash: &self.hash,
        }
    }
}

/// Everything a message or event handler may touch.
pub struct HandlerContext<'a> {
    pub cache: &'a mut DocsCache,
    pub store: &'a dyn DocumentStore,
    pub tx: &'a TxInfo,
    pub policy: &'a QueuePolicy,
}

impl<'a> HandlerContext<'a> {
    pub fn new(
        cache: &'a mut DocsCache,
        store: &'a dyn DocumentStore,
        tx: &'a TxInfo,
        policy: &'a QueuePolicy,
    ) -> Self {
        Self {
            cache,
            store,
            tx,
            policy,
        }
    }
}
