use super::DocsCache;
use crate::model::docs::StatusDoc;
use crate::store::{Document, DocumentStore, SessionId, WriteOp};
use anyhow::{Context, Result};
use futures::future::try_join_all;
use tracing::debug;

/// How a batch reaches the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Every write goes through the session, one after another. Used for
    /// block processing and reconciliation.
    SequentialInTransaction(SessionId),
    /// Writes are issued concurrently outside any session. Used for ad-hoc
    /// updates that tolerate partial application.
    ConcurrentBestEffort,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOptions {
    /// Skip the status write when nothing else changed.
    pub skip_status_if_noop: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlushSummary {
    pub writes: usize,
    pub status_written: bool,
    /// Status as it stood at flush time, written or not.
    pub status: Option<StatusDoc>,
}

impl DocsCache {
    /// Writes every pending change and consumes the cache.
    pub async fn flush(
        self,
        store: &dyn DocumentStore,
        mode: FlushMode,
        options: FlushOptions,
    ) -> Result<FlushSummary> {
        let mut ops = self.pending_writes();
        let writes = ops.len();

        let status_written = self.status.is_some() && !(options.skip_status_if_noop && writes == 0);
        if status_written {
            if let Some(status) = &self.status {
                ops.push(WriteOp::Put(Document::Status(status.clone())));
            }
        }

        match mode {
            FlushMode::SequentialInTransaction(session) => {
                for op in ops {
                    let kind = op.kind();
                    store
                        .apply(op, Some(session))
                        .await
                        .with_context(|| format!("failed to write {kind} document"))?;
                }
            }
            FlushMode::ConcurrentBestEffort => {
                try_join_all(ops.into_iter().map(|op| store.apply(op, None)))
                    .await
                    .context("failed to flush docs cache")?;
            }
        }

        debug!(writes, status_written, ?mode, "flushed docs cache");
        Ok(FlushSummary {
            writes,
            status_written,
            status: self.status,
        })
    }
}
