use crate::model::docs::EmptyBlocksDoc;
use crate::model::ids::EMPTY_BLOCKS_DOC_ID;
use crate::model::uint_range::{sort_and_merge, UintRange};
use crate::store::{DocKind, Document, DocumentStore, SessionId};
use anyhow::{Context, Result};

/// Empty heights seen since the last flush at the chain tip. Kept in memory
/// while catching up and merged into the stored interval set once the poller
/// reaches the tip.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EmptyBlockTracker {
    pending: Vec<UintRange>,
}

impl EmptyBlockTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, height: u64) {
        self.pending = self.with(Some(height));
    }

    pub fn pending(&self) -> &[UintRange] {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Pending ranges plus `extra`, merged, without recording `extra`.
    pub fn with(&self, extra: Option<u64>) -> Vec<UintRange> {
        let mut ranges = self.pending.clone();
        ranges.extend(extra.map(UintRange::single));
        sort_and_merge(ranges)
    }

    /// Merges `ranges` into the stored document inside `session`.
    pub async fn persist(
        store: &dyn DocumentStore,
        session: SessionId,
        ranges: Vec<UintRange>,
    ) -> Result<usize> {
        let ids = [EMPTY_BLOCKS_DOC_ID.to_string()];
        let mut doc = store
            .get_many(DocKind::EmptyBlocks, &ids)
            .await
            .context("failed to load empty block ranges")?
            .into_iter()
            .find_map(|doc| match doc {
                Document::EmptyBlocks(doc) => Some(doc),
                _ => None,
            })
            .unwrap_or_else(EmptyBlocksDoc::default);

        doc.merge(ranges);
        let stored = doc.ranges.len();
        store
            .put(Document::EmptyBlocks(doc), Some(session))
            .await
            .context("failed to write empty block ranges")?;
        Ok(stored)
    }
}
