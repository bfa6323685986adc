use crate::chain::ChainClientFactory;
use crate::processor::{BlockProcessor, ChainPoller, ConnectionManager};
use crate::queue::{ContentFetcher, FetchQueue};
use crate::rpc::TendermintClientFactory;
use crate::runtime::config::IndexerConfig;
use crate::runtime::telemetry::{self, Telemetry};
use crate::store::DocumentStore;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Owns the background loops of a running indexer: the chain poller, the
/// fetch queue worker and the metrics reporter.
pub struct Runner {
    config: IndexerConfig,
    store: Arc<dyn DocumentStore>,
    fetcher: Arc<dyn ContentFetcher>,
    factory: Arc<dyn ChainClientFactory>,
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    handles: Option<RunnerHandles>,
}

struct RunnerHandles {
    run_token: CancellationToken,
    poller: JoinHandle<()>,
    queue: JoinHandle<()>,
    metrics: JoinHandle<()>,
}

impl Runner {
    /// Connects to the configured endpoints through Tendermint JSON-RPC.
    pub fn new(
        config: IndexerConfig,
        store: Arc<dyn DocumentStore>,
        fetcher: Arc<dyn ContentFetcher>,
    ) -> Self {
        let factory = Arc::new(TendermintClientFactory::new(config.rpc_options()));
        Self::with_factory(config, store, fetcher, factory)
    }

    pub fn with_factory(
        config: IndexerConfig,
        store: Arc<dyn DocumentStore>,
        fetcher: Arc<dyn ContentFetcher>,
        factory: Arc<dyn ChainClientFactory>,
    ) -> Self {
        Self {
            config,
            store,
            fetcher,
            factory,
            telemetry: Arc::new(Telemetry::default()),
            shutdown: CancellationToken::new(),
            handles: None,
        }
    }

    /// Returns a clone of the root shutdown token so callers can plug in
    /// their own signal handling.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    pub fn is_running(&self) -> bool {
        self.handles.is_some()
    }

    pub async fn start(&mut self) -> Result<()> {
        if self.handles.is_some() {
            return Ok(());
        }
        self.config.validate()?;

        let connections =
            ConnectionManager::new(self.config.rpc_urls().to_vec(), self.factory.clone())
                .context("failed to build connection manager")?;
        let processor = BlockProcessor::new(self.config.queue_policy(), self.config.gas_window());
        let mut poller = ChainPoller::new(
            self.store.clone(),
            connections,
            processor,
            self.telemetry.clone(),
            self.config.poll_interval(),
        );
        let queue = FetchQueue::new(
            self.store.clone(),
            self.fetcher.clone(),
            self.config.reconciler(),
            self.config.queue_settings(),
            self.telemetry.clone(),
        );

        let run_token = self.shutdown.child_token();

        let poller_token = run_token.clone();
        let root = self.shutdown.clone();
        let poller = tokio::spawn(async move {
            if let Err(err) = poller.run(poller_token).await {
                tracing::error!(error = %format!("{err:#}"), "chain poller stopped; shutting down");
                root.cancel();
            }
        });

        let queue_token = run_token.clone();
        let root = self.shutdown.clone();
        let queue = tokio::spawn(async move {
            if let Err(err) = queue.run(queue_token).await {
                tracing::error!(error = %format!("{err:#}"), "fetch queue stopped; shutting down");
                root.cancel();
            }
        });

        let metrics = telemetry::spawn_metrics_reporter(
            self.telemetry.clone(),
            run_token.clone(),
            self.config.metrics_interval(),
        );

        tracing::info!(
            endpoints = self.config.rpc_urls().len(),
            partition = self.config.queue_partition(),
            partitions = self.config.queue_partitions(),
            "indexer started"
        );
        self.handles = Some(RunnerHandles {
            run_token,
            poller,
            queue,
            metrics,
        });
        Ok(())
    }

    /// Cancels every loop and waits for them to finish.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(handles) = self.handles.take() else {
            return Ok(());
        };

        self.shutdown.cancel();
        handles.shutdown().await;
        self.shutdown = CancellationToken::new();
        tracing::info!("indexer stopped");
        Ok(())
    }

    /// Runs until Ctrl-C or until the shutdown token is cancelled elsewhere.
    pub async fn run_until_ctrl_c(&mut self) -> Result<()> {
        self.start().await?;
        tracing::info!("runner started; waiting for Ctrl-C (SIGINT) to initiate shutdown");

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; shutting down runner");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("runner shutdown token cancelled");
            }
        }

        self.stop().await
    }
}

impl RunnerHandles {
    async fn shutdown(self) {
        self.run_token.cancel();
        for (name, handle) in [
            ("chain poller", self.poller),
            ("fetch queue", self.queue),
            ("metrics reporter", self.metrics),
        ] {
            if let Err(err) = handle.await {
                tracing::warn!(task = name, error = %err, "background task panicked");
            }
        }
    }
}
