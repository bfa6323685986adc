use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{
        create_collection_msg, init_tracing, wait_for_count, wait_for_height, wait_until,
        ScriptedFetcher,
    },
    mock_rpc::{MockChain, MockRpcServer},
};
use anyhow::{Context, Result};
use badge_indexer::{DocKind, IndexerConfig, MemoryStore, Runner};
use serde_json::json;
use tokio::time::{sleep, timeout};

fn config(url: &str) -> Result<IndexerConfig> {
    IndexerConfig::builder()
        .rpc_url(url)
        .poll_interval(Duration::from_millis(20))
        .queue_poll_interval(Duration::from_millis(20))
        .metrics_interval(Duration::from_millis(100))
        .build()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_indexes_blocks_and_drains_the_fetch_queue() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(1);
    chain.push_block(vec![vec![create_collection_msg("ipfs://collection")]]);
    chain.push_block(Vec::new());
    let server = MockRpcServer::start(chain.clone()).await?;

    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.respond("ipfs://collection", json!({"name": "First collection"}));

    let mut runner = Runner::new(config(server.url())?, store.clone(), fetcher.clone());
    runner.start().await?;
    assert!(runner.is_running());

    wait_for_height(&store, 3, Duration::from_secs(5)).await?;
    wait_for_count(&store, DocKind::Fetches, 1, Duration::from_secs(5)).await?;
    wait_until("queue drain", Duration::from_secs(5), || {
        store.count(DocKind::Queue) == 0
    })
    .await?;
    assert_eq!(fetcher.calls(), 1);

    chain.push_block(Vec::new());
    wait_for_height(&store, 4, Duration::from_secs(5)).await?;
    assert!(runner.telemetry().snapshot().processed_blocks >= 4);

    runner.stop().await?;
    assert!(!runner.is_running());
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn run_until_ctrl_c_returns_when_token_cancelled() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(2);
    let server = MockRpcServer::start(chain.clone()).await?;

    let store = Arc::new(MemoryStore::new());
    let mut runner = Runner::new(
        config(server.url())?,
        store.clone(),
        Arc::new(ScriptedFetcher::default()),
    );
    let token = runner.cancellation_token();

    let handle = tokio::spawn(async move { runner.run_until_ctrl_c().await });
    wait_for_height(&store, 2, Duration::from_secs(5)).await?;
    sleep(Duration::from_millis(50)).await;
    token.cancel();

    timeout(Duration::from_secs(5), handle)
        .await
        .context("runner did not exit after cancellation")?
        .context("runner task panicked")??;

    server.shutdown().await;
    Ok(())
}
