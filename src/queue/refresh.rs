use crate::cache::DocsCache;
use crate::model::docs::{FetchDoc, RefreshDoc};
use crate::model::ids::collection_doc_id;
use crate::store::DocumentStore;
use anyhow::Result;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Requested { at: u64 },
    Throttled { last_requested_at: u64, retry_after_ms: u64 },
}

/// Moves the collection's refresh timestamp to `now`, at most once per
/// `min_interval` unless `force` is set.
pub async fn request_refresh(
    cache: &mut DocsCache,
    store: &dyn DocumentStore,
    collection_id: u64,
    now: u64,
    min_interval: Duration,
    force: bool,
) -> Result<RefreshOutcome> {
    let id = collection_doc_id(collection_id);
    cache
        .fetch_if_empty::<RefreshDoc>(store, std::slice::from_ref(&id))
        .await?;

    let last = cache
        .get::<RefreshDoc>(&id)
        .map(|doc| doc.refresh_requested_at);
    let min_ms = u64::try_from(min_interval.as_millis()).unwrap_or(u64::MAX);

    if let (Some(last), false) = (last, force) {
        let eligible_at = last.saturating_add(min_ms);
        if now < eligible_at {
            return Ok(RefreshOutcome::Throttled {
                last_requested_at: last,
                retry_after_ms: eligible_at - now,
            });
        }
    }

    let at = now.max(last.unwrap_or_default());
    cache.put(RefreshDoc {
        collection_id,
        refresh_requested_at: at,
    })?;
    Ok(RefreshOutcome::Requested { at })
}

/// A cached fetch is stale once a refresh was requested after it landed.
pub fn is_stale(fetch: Option<&FetchDoc>, refresh_requested_at: u64) -> bool {
    fetch.map_or(true, |doc| doc.fetched_at < refresh_requested_at)
}
