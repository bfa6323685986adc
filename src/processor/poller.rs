//! Catch-up loop. Each tick compares the persisted height with the chain tip
//! and replays the missing blocks one at a time, each inside its own store
//! session.

use super::block::{BlockProcessor, BlockReport};
use super::connection::ConnectionManager;
use super::empty_blocks::EmptyBlockTracker;
use super::errors::ErrorLog;
use crate::cache::{DocsCache, FlushMode, FlushOptions};
use crate::chain::{ChainBlock, ChainClient};
use crate::model::docs::StatusDoc;
use crate::model::ids::STATUS_DOC_ID;
use crate::rpc::RpcError;
use crate::runtime::clock::unix_millis;
use crate::runtime::telemetry::Telemetry;
use crate::store::{DocKind, Document, DocumentStore, SessionId};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing to do; the indexed height equals the chain tip.
    AtTip { height: u64 },
    /// Blocks `from..=to` were committed. `to` may stop short of the tip when
    /// shutdown was requested between blocks.
    Advanced { from: u64, to: u64 },
    /// A block failed and was rolled back; it is retried next tick.
    BlockFailed { height: u64 },
    /// The endpoint failed and was rotated out.
    Disconnected,
    /// The node reported a tip it cannot serve yet.
    Waiting { height: u64 },
    /// Shutdown was requested before the first missing block.
    Stopped { height: u64 },
}

pub struct ChainPoller {
    store: Arc<dyn DocumentStore>,
    connections: ConnectionManager,
    processor: BlockProcessor,
    errors: ErrorLog,
    empty_blocks: EmptyBlockTracker,
    status: Option<StatusDoc>,
    telemetry: Arc<Telemetry>,
    poll_interval: Duration,
}

impl ChainPoller {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        connections: ConnectionManager,
        processor: BlockProcessor,
        telemetry: Arc<Telemetry>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            errors: ErrorLog::new(store.clone()),
            store,
            connections,
            processor,
            empty_blocks: EmptyBlockTracker::new(),
            status: None,
            telemetry,
            poll_interval,
        }
    }

    /// Last committed status, once loaded.
    pub fn status(&self) -> Option<&StatusDoc> {
        self.status.as_ref()
    }

    pub fn pending_empty_blocks(&self) -> &EmptyBlockTracker {
        &self.empty_blocks
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Runs ticks on `poll_interval` until `shutdown` is cancelled. A block
    /// in flight always finishes before the loop exits.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        let mut ticker = time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    info!("chain poller shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    match self.tick(&shutdown).await {
                        Ok(outcome) => debug!(?outcome, "poller tick finished"),
                        Err(err) if shutdown.is_cancelled() => {
                            debug!(error = %err, "poller tick interrupted by shutdown");
                        }
                        Err(err) => error!(error = %format!("{err:#}"), "poller tick failed"),
                    }
                }
            }
        }
    }

    pub async fn tick(&mut self, shutdown: &CancellationToken) -> Result<TickOutcome> {
        let mut status = self.load_status().await?;
        let client = self.connections.client(shutdown).await?;

        let tip = match client.latest_height().await {
            Ok(tip) => tip,
            Err(err) => return Ok(self.handle_rpc_failure(client.as_ref(), None, err).await),
        };

        let start = status.block.height;
        if start >= tip {
            if !self.empty_blocks.is_empty() {
                self.flush_empty_blocks(&status).await?;
            }
            return Ok(TickOutcome::AtTip { height: start });
        }

        for height in start + 1..=tip {
            if shutdown.is_cancelled() {
                info!(height, "shutdown requested; stopping catch-up");
                break;
            }

            let block = match client.fetch_block(height).await {
                Ok(block) => block,
                Err(err) => {
                    let outcome = self.handle_rpc_failure(client.as_ref(), Some(height), err).await;
                    return Ok(if status.block.height > start {
                        TickOutcome::Advanced {
                            from: start + 1,
                            to: status.block.height,
                        }
                    } else {
                        outcome
                    });
                }
            };

            match self.commit_block(&status, &block, height == tip).await {
                Ok((next, report)) => {
                    self.telemetry.record_block(height, report.is_empty());
                    self.telemetry.record_skipped_txs(report.skipped_txs as u64);
                    self.telemetry
                        .record_skipped_events(report.events.skipped as u64);
                    status = next;
                }
                Err(err) => {
                    self.telemetry.record_block_failure();
                    error!(height, error = %format!("{err:#}"), "block processing failed; will retry");
                    self.errors
                        .record("block", Some(height), &err, unix_millis())
                        .await;
                    return Ok(TickOutcome::BlockFailed { height });
                }
            }
        }

        if status.block.height == start {
            return Ok(TickOutcome::Stopped { height: start });
        }
        Ok(TickOutcome::Advanced {
            from: start + 1,
            to: status.block.height,
        })
    }

    /// Processes and commits one block. On any error the session is aborted
    /// and neither the in-memory status nor the empty-block set moves.
    async fn commit_block(
        &mut self,
        status: &StatusDoc,
        block: &ChainBlock,
        at_tip: bool,
    ) -> Result<(StatusDoc, BlockReport)> {
        let session = self
            .store
            .start_session()
            .await
            .context("failed to start store session")?;

        let staged = self.stage_block(session, status, block, at_tip).await;
        let result = match staged {
            Ok(staged) => self
                .store
                .commit(session)
                .await
                .with_context(|| format!("failed to commit block {}", block.height))
                .map(|_| staged),
            Err(err) => {
                if let Err(abort_err) = self.store.abort(session).await {
                    warn!(height = block.height, error = %abort_err, "failed to abort store session");
                }
                Err(err)
            }
        };

        let (next, report) = result?;
        if report.is_empty() {
            self.empty_blocks.record(block.height);
        }
        if at_tip {
            self.empty_blocks.clear();
        }
        self.status = Some(next.clone());
        Ok((next, report))
    }

    async fn stage_block(
        &self,
        session: SessionId,
        status: &StatusDoc,
        block: &ChainBlock,
        at_tip: bool,
    ) -> Result<(StatusDoc, BlockReport)> {
        let mut cache = DocsCache::with_status(status.clone());
        let report = self
            .processor
            .process(&mut cache, self.store.as_ref(), block)
            .await
            .with_context(|| format!("failed to process block {}", block.height))?;

        if at_tip {
            let extra = report.is_empty().then_some(block.height);
            let ranges = self.empty_blocks.with(extra);
            if !ranges.is_empty() {
                EmptyBlockTracker::persist(self.store.as_ref(), session, ranges).await?;
            }
        }

        let summary = cache
            .flush(
                self.store.as_ref(),
                FlushMode::SequentialInTransaction(session),
                FlushOptions {
                    skip_status_if_noop: !at_tip,
                },
            )
            .await
            .with_context(|| format!("failed to flush block {}", block.height))?;

        let next = summary
            .status
            .context("status document missing after flush")?;
        Ok((next, report))
    }

    /// Writes pending empty ranges when a previous catch-up stopped before
    /// reaching the tip block.
    async fn flush_empty_blocks(&mut self, status: &StatusDoc) -> Result<()> {
        let session = self.store.start_session().await?;
        let ranges = self.empty_blocks.with(None);
        let staged = async {
            EmptyBlockTracker::persist(self.store.as_ref(), session, ranges).await?;
            self.store
                .put(Document::Status(status.clone()), Some(session))
                .await?;
            anyhow::Ok(())
        }
        .await;

        match staged {
            Ok(()) => {
                self.store.commit(session).await?;
                self.empty_blocks.clear();
                Ok(())
            }
            Err(err) => {
                if let Err(abort_err) = self.store.abort(session).await {
                    warn!(error = %abort_err, "failed to abort store session");
                }
                Err(err)
            }
        }
    }

    async fn handle_rpc_failure(
        &mut self,
        client: &dyn ChainClient,
        height: Option<u64>,
        err: anyhow::Error,
    ) -> TickOutcome {
        if let (Some(height), Some(RpcError::HeightNotAvailable { .. })) =
            (height, err.downcast_ref::<RpcError>())
        {
            debug!(height, endpoint = client.endpoint(), "block not yet served; waiting");
            return TickOutcome::Waiting { height };
        }

        if matches!(err.downcast_ref::<RpcError>(), Some(RpcError::Timeout { .. })) {
            self.telemetry.record_rpc_timeout();
        } else {
            self.telemetry.record_rpc_error();
        }
        warn!(
            endpoint = client.endpoint(),
            ?height,
            error = %format!("{err:#}"),
            "rpc request failed; rotating endpoint"
        );
        self.errors.record("rpc", height, &err, unix_millis()).await;
        self.connections.rotate();
        TickOutcome::Disconnected
    }

    async fn load_status(&mut self) -> Result<StatusDoc> {
        if let Some(status) = &self.status {
            return Ok(status.clone());
        }
        let ids = [STATUS_DOC_ID.to_string()];
        let stored = self
            .store
            .get_many(DocKind::Status, &ids)
            .await
            .context("failed to load status document")?
            .into_iter()
            .find_map(|doc| match doc {
                Document::Status(status) => Some(status),
                _ => None,
            });
        let status = stored.unwrap_or_else(StatusDoc::genesis);
        info!(height = status.block.height, "loaded indexer status");
        self.status = Some(status.clone());
        Ok(status)
    }
}
