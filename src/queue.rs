//! Asynchronous fetch queue for off-chain content. Entries live in the
//! document store so retries and backoff survive restarts, and replicas split
//! the work by partition instead of coordinating.

pub mod backoff;
pub mod enqueue;
pub mod fetcher;
pub mod ids;
pub mod refresh;
pub mod scheduler;

use crate::cache::{DocsCache, FlushMode, FlushOptions};
use crate::model::docs::CollectionDoc;
use crate::model::ids::collection_doc_id;
use crate::store::DocumentStore;
use anyhow::{bail, Result};
use std::time::Duration;
use tracing::info;

pub use enqueue::{collection_fetch_requests, enqueue_if_stale, FetchRequest};
pub use fetcher::{ContentFetcher, FetchError};
pub use ids::QueueEntropy;
pub use refresh::{request_refresh, RefreshOutcome};
pub use scheduler::{FetchQueue, FetchQueueSettings, QueueTickReport};

/// Enqueue parameters shared by block handlers and ad-hoc refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePolicy {
    pub partitions: u32,
    pub refresh_min_interval: Duration,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            partitions: 1,
            refresh_min_interval: Duration::from_secs(60),
        }
    }
}

/// Handles a refresh request made outside block processing: bumps the
/// collection's refresh timestamp (debounced unless `force`) and queues every
/// piece of content that is now stale under a random id.
pub async fn request_collection_refresh(
    store: &dyn DocumentStore,
    policy: &QueuePolicy,
    collection_id: u64,
    now: u64,
    force: bool,
) -> Result<RefreshOutcome> {
    let mut cache = DocsCache::new();
    let id = collection_doc_id(collection_id);
    cache
        .fetch_if_empty::<CollectionDoc>(store, std::slice::from_ref(&id))
        .await?;
    let Some(collection) = cache.get::<CollectionDoc>(&id).cloned() else {
        bail!("collection {collection_id} does not exist");
    };

    let outcome = request_refresh(
        &mut cache,
        store,
        collection_id,
        now,
        policy.refresh_min_interval,
        force,
    )
    .await?;
    if let RefreshOutcome::Throttled { .. } = outcome {
        return Ok(outcome);
    }

    let mut queued = 0;
    for request in collection_fetch_requests(&collection, now) {
        if enqueue_if_stale(
            &mut cache,
            store,
            policy.partitions,
            QueueEntropy::AdHoc,
            &request,
            now,
        )
        .await?
        .is_some()
        {
            queued += 1;
        }
    }

    cache
        .flush(store, FlushMode::ConcurrentBestEffort, FlushOptions::default())
        .await?;
    info!(collection_id, queued, "collection refresh requested");
    Ok(outcome)
}
