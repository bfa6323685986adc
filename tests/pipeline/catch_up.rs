use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{bank_send_msg, create_collection_msg, init_tracing, stored_status, ALICE, BOB},
    mock_rpc::{refused_url, MockChain, MockRpcServer},
};
use anyhow::Result;
use badge_indexer::model::docs::EmptyBlocksDoc;
use badge_indexer::model::ids::EMPTY_BLOCKS_DOC_ID;
use badge_indexer::model::UintRange;
use badge_indexer::processor::DEFAULT_GAS_WINDOW;
use badge_indexer::rpc::RpcClientOptions;
use badge_indexer::{
    BlockProcessor, ChainPoller, ConnectionManager, DocKind, Document, MemoryStore, QueuePolicy,
    Telemetry, TendermintClientFactory, TickOutcome,
};
use tokio_util::sync::CancellationToken;

fn poller(store: Arc<MemoryStore>, endpoints: Vec<String>) -> Result<ChainPoller> {
    let factory = Arc::new(TendermintClientFactory::new(RpcClientOptions {
        request_timeout: Duration::from_secs(2),
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(20),
        ..RpcClientOptions::default()
    }));
    let connections = ConnectionManager::new(endpoints, factory)?
        .with_backoff(Duration::from_millis(10), Duration::from_millis(50));
    Ok(ChainPoller::new(
        store,
        connections,
        BlockProcessor::new(QueuePolicy::default(), DEFAULT_GAS_WINDOW),
        Arc::new(Telemetry::default()),
        Duration::from_millis(20),
    ))
}

fn stored_empty_blocks(store: &MemoryStore) -> Vec<UintRange> {
    match store.get(DocKind::EmptyBlocks, EMPTY_BLOCKS_DOC_ID) {
        Some(Document::EmptyBlocks(EmptyBlocksDoc { ranges, .. })) => ranges,
        _ => Vec::new(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn poller_indexes_blocks_served_over_rpc() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(2);
    chain.push_block(vec![
        vec![create_collection_msg("ipfs://collection")],
        vec![bank_send_msg(ALICE, BOB)],
    ]);
    chain.push_block(Vec::new());
    chain.push_block(Vec::new());
    let server = MockRpcServer::start(chain.clone()).await?;

    let store = Arc::new(MemoryStore::new());
    let mut poller = poller(store.clone(), vec![server.url().to_string()])?;

    let outcome = poller.tick(&CancellationToken::new()).await?;
    assert_eq!(outcome, TickOutcome::Advanced { from: 1, to: 5 });

    let status = stored_status(&store).expect("status persisted");
    assert_eq!(status.block.height, 5);
    assert_eq!(status.next_collection_id, 2);
    assert!(store.get(DocKind::Collections, "1").is_some());
    assert!(store.get(DocKind::Accounts, BOB).is_some());
    assert_eq!(store.count(DocKind::Queue), 1);
    assert_eq!(
        stored_empty_blocks(&store),
        vec![UintRange::new(1, 2), UintRange::new(4, 5)]
    );
    assert_eq!(store.open_sessions(), 0);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn poller_follows_the_tip() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(3);
    let server = MockRpcServer::start(chain.clone()).await?;

    let store = Arc::new(MemoryStore::new());
    let mut poller = poller(store.clone(), vec![server.url().to_string()])?;
    let shutdown = CancellationToken::new();

    assert_eq!(poller.tick(&shutdown).await?, TickOutcome::Advanced { from: 1, to: 3 });
    assert_eq!(poller.tick(&shutdown).await?, TickOutcome::AtTip { height: 3 });

    chain.push_block(vec![vec![create_collection_msg("ipfs://next")]]);
    assert_eq!(poller.tick(&shutdown).await?, TickOutcome::Advanced { from: 4, to: 4 });
    assert_eq!(stored_status(&store).unwrap().block.height, 4);
    assert_eq!(stored_empty_blocks(&store), vec![UintRange::new(1, 3)]);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refused_endpoint_fails_over_to_the_next() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(4);
    let server = MockRpcServer::start(chain.clone()).await?;
    let dead = refused_url().await?;

    let store = Arc::new(MemoryStore::new());
    let mut poller = poller(store.clone(), vec![dead.clone(), server.url().to_string()])?;

    let outcome = poller.tick(&CancellationToken::new()).await?;
    assert_eq!(outcome, TickOutcome::Advanced { from: 1, to: 4 });
    let current = poller.connections().current().expect("connected");
    assert_eq!(current.endpoint(), server.url());
    assert_eq!(
        poller.connections().endpoints(),
        vec![server.url().to_string(), dead]
    );
    // A refused connection is transient and never lands in the error log.
    assert_eq!(store.count(DocKind::Errors), 0);

    server.shutdown().await;
    Ok(())
}
