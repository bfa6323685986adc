use super::ids::{load_balance_id, queue_id, QueueEntropy};
use super::refresh::is_stale;
use crate::cache::DocsCache;
use crate::model::docs::{CollectionDoc, FetchDoc, FetchKind, QueueDoc, RefreshDoc};
use crate::model::ids::collection_doc_id;
use crate::model::timeline::active_at;
use crate::store::DocumentStore;
use anyhow::Result;
use tracing::debug;

/// One piece of off-chain content a collection depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub kind: FetchKind,
    pub collection_id: u64,
    pub entity_id: String,
    pub uri: String,
}

/// Off-chain content referenced by the collection's timelines at `time`.
pub fn collection_fetch_requests(collection: &CollectionDoc, time: u64) -> Vec<FetchRequest> {
    let collection_id = collection.collection_id;
    let mut requests = Vec::new();

    if let Some(entry) = active_at(&collection.collection_metadata_timeline, time) {
        requests.push(FetchRequest {
            kind: FetchKind::CollectionMetadata,
            collection_id,
            entity_id: collection_id.to_string(),
            uri: entry.collection_metadata.uri.clone(),
        });
    }

    if let Some(entry) = active_at(&collection.badge_metadata_timeline, time) {
        for metadata in &entry.badge_metadata {
            requests.push(FetchRequest {
                kind: FetchKind::BadgeMetadata,
                collection_id,
                entity_id: format!("{collection_id}-badges"),
                uri: metadata.uri.clone(),
            });
        }
    }

    if collection.has_off_chain_balances() {
        if let Some(entry) = active_at(&collection.off_chain_balances_metadata_timeline, time) {
            requests.push(FetchRequest {
                kind: FetchKind::Balances,
                collection_id,
                entity_id: format!("{collection_id}-balances"),
                uri: entry.off_chain_balances_metadata.uri.clone(),
            });
        }
    }

    requests.retain(|request| !request.uri.is_empty());
    requests.dedup();
    requests
}

/// Queues `request` unless its cached content is newer than the collection's
/// last refresh request. Returns the queue id when something was queued.
pub async fn enqueue_if_stale(
    cache: &mut DocsCache,
    store: &dyn DocumentStore,
    partitions: u32,
    entropy: QueueEntropy<'_>,
    request: &FetchRequest,
    now: u64,
) -> Result<Option<String>> {
    if request.uri.is_empty() {
        return Ok(None);
    }

    let refresh_id = collection_doc_id(request.collection_id);
    cache
        .fetch_if_empty::<RefreshDoc>(store, std::slice::from_ref(&refresh_id))
        .await?;
    cache
        .fetch_if_empty::<FetchDoc>(store, std::slice::from_ref(&request.uri))
        .await?;

    let refresh_requested_at = cache
        .get::<RefreshDoc>(&refresh_id)
        .map_or(0, |doc| doc.refresh_requested_at);
    if !is_stale(cache.get::<FetchDoc>(&request.uri), refresh_requested_at) {
        debug!(uri = %request.uri, "cached content is fresh, skipping fetch");
        return Ok(None);
    }

    let id = queue_id(entropy, &request.entity_id, &request.uri);
    cache.enqueue(QueueDoc {
        id: id.clone(),
        uri: request.uri.clone(),
        kind: request.kind,
        collection_id: request.collection_id,
        load_balance_id: load_balance_id(&id, partitions),
        refresh_requested_at,
        created_at: now,
        retries: 0,
        next_fetch_time: now,
        deleted_at: None,
        last_error: None,
    });
    Ok(Some(id))
}
