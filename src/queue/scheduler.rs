use super::backoff::next_fetch_time;
use super::fetcher::{fetch_with_timeout, is_permanent_uri, ContentFetcher, FetchError};
use crate::model::docs::{ErrorDoc, FetchDoc, FetchKind, QueueDoc};
use crate::reconcile::{parse_balances_map, BalanceReconciler, ReconcileError, ReconcileRequest};
use crate::runtime::clock::unix_millis;
use crate::runtime::telemetry::Telemetry;
use crate::store::{DocKind, Document, DocumentStore};
use anyhow::{Context, Result};
use futures::future::try_join_all;
use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchQueueSettings {
    /// Partition this replica claims.
    pub partition: u32,
    pub batch_size: usize,
    pub base_delay: Duration,
    pub fetch_timeout: Duration,
    pub max_retries: u32,
    pub poll_interval: Duration,
}

impl Default for FetchQueueSettings {
    fn default() -> Self {
        Self {
            partition: 0,
            batch_size: 25,
            base_delay: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(10),
            max_retries: 10,
            poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueTickReport {
    pub claimed: usize,
    pub uris: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

enum UriOutcome {
    Succeeded { entries: usize },
    Failed { entries: usize, dead_lettered: usize },
}

/// Claims due queue entries for one partition and executes them.
pub struct FetchQueue {
    store: Arc<dyn DocumentStore>,
    fetcher: Arc<dyn ContentFetcher>,
    reconciler: BalanceReconciler,
    settings: FetchQueueSettings,
    telemetry: Arc<Telemetry>,
}

impl FetchQueue {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        fetcher: Arc<dyn ContentFetcher>,
        reconciler: BalanceReconciler,
        settings: FetchQueueSettings,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            store,
            fetcher,
            reconciler,
            settings,
            telemetry,
        }
    }

    pub fn settings(&self) -> &FetchQueueSettings {
        &self.settings
    }

    /// Runs one claim/execute round at wall-clock `now` (unix millis).
    pub async fn tick(&self, now: u64) -> Result<QueueTickReport> {
        let claimed = self
            .store
            .claim_queue(self.settings.partition, now, self.settings.batch_size)
            .await
            .context("failed to claim queue entries")?;

        let mut report = QueueTickReport {
            claimed: claimed.len(),
            ..QueueTickReport::default()
        };
        if claimed.is_empty() {
            return Ok(report);
        }

        let mut by_uri: BTreeMap<String, Vec<QueueDoc>> = BTreeMap::new();
        for entry in claimed {
            by_uri.entry(entry.uri.clone()).or_default().push(entry);
        }
        report.uris = by_uri.len();

        let outcomes: Vec<UriOutcome> = stream::iter(by_uri)
            .map(|(uri, entries)| self.process_uri(uri, entries, now))
            .buffer_unordered(self.settings.batch_size.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                UriOutcome::Succeeded { entries } => report.succeeded += entries,
                UriOutcome::Failed {
                    entries,
                    dead_lettered,
                } => {
                    report.failed += entries;
                    report.dead_lettered += dead_lettered;
                }
            }
        }

        Ok(report)
    }

    /// Polls until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let mut ticker = time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    info!(partition = self.settings.partition, "fetch queue shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.tick(unix_millis()).await {
                        Ok(report) if report.claimed > 0 => info!(
                            partition = self.settings.partition,
                            claimed = report.claimed,
                            uris = report.uris,
                            succeeded = report.succeeded,
                            failed = report.failed,
                            dead_lettered = report.dead_lettered,
                            "processed fetch queue batch"
                        ),
                        Ok(_) => {}
                        Err(err) => warn!(error = %err, "fetch queue tick failed"),
                    }
                }
            }
        }
        Ok(())
    }

    async fn process_uri(&self, uri: String, entries: Vec<QueueDoc>, now: u64) -> UriOutcome {
        match self.execute(&uri, &entries, now).await {
            Ok(()) => {
                self.telemetry.record_queue_fetch(true);
                if let Err(err) = self.complete(&entries).await {
                    warn!(uri = %uri, error = %err, "failed to remove completed queue entries");
                }
                debug!(uri = %uri, entries = entries.len(), "queued fetch completed");
                UriOutcome::Succeeded {
                    entries: entries.len(),
                }
            }
            Err(err) => {
                self.telemetry.record_queue_fetch(false);
                warn!(uri = %uri, entries = entries.len(), error = %err, "queued fetch failed");
                if err.downcast_ref::<ReconcileError>().is_some() {
                    self.record_error(&uri, &err, now).await;
                }
                let dead_lettered = self.reschedule(&entries, &err, now).await;
                UriOutcome::Failed {
                    entries: entries.len(),
                    dead_lettered,
                }
            }
        }
    }

    async fn execute(&self, uri: &str, entries: &[QueueDoc], now: u64) -> Result<()> {
        let ids = [uri.to_string()];
        let cached = self
            .store
            .get_many(DocKind::Fetches, &ids)
            .await
            .context("failed to load cached fetch")?
            .into_iter()
            .find_map(|doc| match doc {
                Document::Fetch(doc) => Some(doc),
                _ => None,
            });

        let balance_collections: BTreeSet<u64> = entries
            .iter()
            .filter(|entry| entry.kind == FetchKind::Balances)
            .map(|entry| entry.collection_id)
            .collect();

        let payload = match cached {
            Some(mut doc) if doc.permanent => {
                doc.fetched_at = now;
                let content = doc.content.clone();
                self.store
                    .put(Document::Fetch(doc), None)
                    .await
                    .context("failed to bump cached fetch")?;
                content
            }
            _ => {
                let content =
                    fetch_with_timeout(self.fetcher.as_ref(), uri, self.settings.fetch_timeout)
                        .await?;
                if !balance_collections.is_empty() {
                    parse_balances_map(&content).map_err(|err| FetchError::InvalidContent {
                        uri: uri.to_string(),
                        reason: format!("{err:#}"),
                    })?;
                }
                let encoded = serde_json::to_vec(&content).context("failed to encode content")?;
                self.store
                    .put(
                        Document::Fetch(FetchDoc {
                            uri: uri.to_string(),
                            content_hash: hex::encode(Sha256::digest(&encoded)),
                            content: content.clone(),
                            fetched_at: now,
                            permanent: is_permanent_uri(uri),
                        }),
                        None,
                    )
                    .await
                    .context("failed to cache fetched content")?;
                content
            }
        };

        if balance_collections.is_empty() {
            return Ok(());
        }

        let balances = parse_balances_map(&payload).map_err(|err| FetchError::InvalidContent {
            uri: uri.to_string(),
            reason: format!("{err:#}"),
        })?;
        for collection_id in balance_collections {
            self.reconciler
                .reconcile(
                    self.store.as_ref(),
                    ReconcileRequest {
                        collection_id,
                        balances: &balances,
                        uri: Some(uri),
                        now,
                    },
                )
                .await
                .with_context(|| format!("reconciling collection {collection_id} failed"))?;
            self.telemetry.record_reconciliation();
        }
        Ok(())
    }

    async fn complete(&self, entries: &[QueueDoc]) -> Result<()> {
        try_join_all(
            entries
                .iter()
                .map(|entry| self.store.delete(DocKind::Queue, &entry.id, None)),
        )
        .await
        .context("failed to delete queue entries")?;
        Ok(())
    }

    /// Writes each entry back with one more retry, either rescheduled with
    /// exponential delay or soft-deleted once retries are exhausted.
    async fn reschedule(&self, entries: &[QueueDoc], err: &anyhow::Error, now: u64) -> usize {
        let mut dead_lettered = 0;
        let updates: Vec<QueueDoc> = entries
            .iter()
            .map(|entry| {
                let mut next = entry.clone();
                next.retries = entry.retries.saturating_add(1);
                next.last_error = Some(format!("{err:#}"));
                if next.retries >= self.settings.max_retries {
                    next.deleted_at = Some(now);
                    dead_lettered += 1;
                    self.telemetry.record_dead_letter();
                    warn!(queue_id = %next.id, uri = %next.uri, retries = next.retries, "queue entry exhausted its retries");
                } else {
                    next.next_fetch_time = next_fetch_time(now, self.settings.base_delay, next.retries);
                }
                next
            })
            .collect();

        let writes = updates
            .into_iter()
            .map(|entry| self.store.put(Document::Queue(entry), None));
        if let Err(err) = try_join_all(writes).await {
            warn!(error = %err, "failed to reschedule queue entries");
        }
        dead_lettered
    }

    async fn record_error(&self, uri: &str, err: &anyhow::Error, now: u64) {
        let doc = ErrorDoc {
            id: super::ids::random_queue_id(),
            context: format!("queue:{uri}"),
            error: format!("{err:#}"),
            height: None,
            timestamp: now,
        };
        if let Err(store_err) = self.store.insert_unique(Document::Error(doc), None).await {
            warn!(uri, error = %store_err, "failed to persist queue error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::balance::Balance;
    use crate::model::docs::BalanceDoc;
    use crate::model::uint_range::UintRange;
    use crate::store::MemoryStore;
    use futures::future::BoxFuture;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const ALICE: &str = "cosmos1qypqxpq9qcrsszg2pvxq6rs0zqg3yyc5lzv7xu";

    #[derive(Default)]
    struct ScriptedFetcher {
        responses: Mutex<HashMap<String, serde_json::Value>>,
        calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn respond(&self, uri: &str, value: serde_json::Value) {
            self.responses
                .lock()
                .unwrap()
                .insert(uri.to_string(), value);
        }
    }

    impl ContentFetcher for ScriptedFetcher {
        fn fetch<'a>(
            &'a self,
            uri: &'a str,
        ) -> BoxFuture<'a, Result<serde_json::Value, FetchError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.responses
                    .lock()
                    .unwrap()
                    .get(uri)
                    .cloned()
                    .ok_or_else(|| FetchError::Transport {
                        uri: uri.to_string(),
                        reason: "not found".into(),
                    })
            })
        }
    }

    fn entry(id: &str, uri: &str, kind: FetchKind, retries: u32) -> QueueDoc {
        QueueDoc {
            id: id.into(),
            uri: uri.into(),
            kind,
            collection_id: 1,
            load_balance_id: 0,
            refresh_requested_at: 0,
            created_at: 0,
            retries,
            next_fetch_time: 0,
            deleted_at: None,
            last_error: None,
        }
    }

    fn queue(store: Arc<MemoryStore>, fetcher: Arc<ScriptedFetcher>) -> FetchQueue {
        FetchQueue::new(
            store,
            fetcher,
            BalanceReconciler::default(),
            FetchQueueSettings {
                max_retries: 5,
                ..FetchQueueSettings::default()
            },
            Arc::new(Telemetry::default()),
        )
    }

    fn stored_queue(store: &MemoryStore, id: &str) -> QueueDoc {
        match store.get(DocKind::Queue, id) {
            Some(Document::Queue(doc)) => doc,
            other => panic!("missing queue entry {id}: {other:?}"),
        }
    }

    #[tokio::test]
    async fn entries_sharing_a_uri_fetch_once_and_all_complete() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.respond("https://meta", serde_json::json!({"name": "badge"}));
        for id in ["a", "b"] {
            store
                .put(Document::Queue(entry(id, "https://meta", FetchKind::CollectionMetadata, 0)), None)
                .await
                .unwrap();
        }

        let report = queue(store.clone(), fetcher.clone()).tick(1_000).await.unwrap();

        assert_eq!(report.claimed, 2);
        assert_eq!(report.uris, 1);
        assert_eq!(report.succeeded, 2);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.count(DocKind::Queue), 0);
        assert_eq!(store.count(DocKind::Fetches), 1);
    }

    #[tokio::test]
    async fn failures_back_off_exponentially() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(ScriptedFetcher::default());
        store
            .put(Document::Queue(entry("a", "https://down", FetchKind::BadgeMetadata, 2)), None)
            .await
            .unwrap();

        let queue = queue(store.clone(), fetcher);
        let report = queue.tick(1_000).await.unwrap();
        assert_eq!(report.failed, 1);

        let rescheduled = stored_queue(&store, "a");
        assert_eq!(rescheduled.retries, 3);
        assert_eq!(rescheduled.next_fetch_time, 1_000 + 8 * 60_000);
        assert!(rescheduled.last_error.is_some());

        // Not due yet.
        assert_eq!(queue.tick(2_000).await.unwrap().claimed, 0);
    }

    #[tokio::test]
    async fn exhausted_entries_are_soft_deleted() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(ScriptedFetcher::default());
        store
            .put(Document::Queue(entry("a", "https://down", FetchKind::BadgeMetadata, 4)), None)
            .await
            .unwrap();

        let report = queue(store.clone(), fetcher).tick(1_000).await.unwrap();
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(stored_queue(&store, "a").deleted_at, Some(1_000));
    }

    #[tokio::test]
    async fn balances_payload_runs_reconciliation_and_permanent_refetch_uses_cache() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(ScriptedFetcher::default());
        let supply = vec![Balance::new(10, vec![UintRange::single(1)], vec![UintRange::FULL])];
        let mut total = BalanceDoc::total(1);
        total.balances = supply.clone();
        let mut mint = BalanceDoc::mint(1);
        mint.balances = supply;
        store.put(Document::Balance(total), None).await.unwrap();
        store.put(Document::Balance(mint), None).await.unwrap();

        fetcher.respond(
            "ipfs://balances",
            serde_json::json!({
                ALICE: [{"amount": "4", "badgeIds": [{"start": "1", "end": "1"}], "ownershipTimes": [{"start": "1", "end": "18446744073709551615"}]}]
            }),
        );
        store
            .put(Document::Queue(entry("a", "ipfs://balances", FetchKind::Balances, 0)), None)
            .await
            .unwrap();

        let queue = queue(store.clone(), fetcher.clone());
        assert_eq!(queue.tick(1_000).await.unwrap().succeeded, 1);
        assert_eq!(store.count(DocKind::TransferActivity), 1);

        store
            .put(Document::Queue(entry("b", "ipfs://balances", FetchKind::Balances, 0)), None)
            .await
            .unwrap();
        assert_eq!(queue.tick(2_000).await.unwrap().succeeded, 1);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.count(DocKind::TransferActivity), 1);
        match store.get(DocKind::Fetches, "ipfs://balances") {
            Some(Document::Fetch(doc)) => assert_eq!(doc.fetched_at, 2_000),
            other => panic!("unexpected fetch doc {other:?}"),
        }
    }

    #[tokio::test]
    async fn reconciliation_failures_are_persisted() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.respond(
            "https://balances",
            serde_json::json!({ ALICE: [{"amount": "4", "badgeIds": [{"start": 1, "end": 1}], "ownershipTimes": [{"start": 1, "end": 5}]}] }),
        );
        store
            .put(Document::Queue(entry("a", "https://balances", FetchKind::Balances, 0)), None)
            .await
            .unwrap();

        let report = queue(store.clone(), fetcher).tick(1_000).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(store.count(DocKind::Errors), 1);
        assert_eq!(stored_queue(&store, "a").retries, 1);
    }

    #[tokio::test]
    async fn only_own_partition_is_claimed() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(ScriptedFetcher::default());
        let mut foreign = entry("x", "https://meta", FetchKind::CollectionMetadata, 0);
        foreign.load_balance_id = 1;
        store.put(Document::Queue(foreign), None).await.unwrap();

        let report = queue(store, fetcher).tick(1_000).await.unwrap();
        assert_eq!(report.claimed, 0);
    }
}
