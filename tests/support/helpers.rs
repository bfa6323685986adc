use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::{Duration, Instant},
};

use anyhow::{bail, Result};
use badge_indexer::model::docs::StatusDoc;
use badge_indexer::model::ids::STATUS_DOC_ID;
use badge_indexer::{ContentFetcher, DocKind, Document, FetchError, MemoryStore};
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

pub const ALICE: &str = "cosmos1qypqxpq9qcrsszg2pvxq6rs0zqg3yyc5lzv7xu";
pub const BOB: &str = "cosmos1zg69v7ys40x77y352eufp27daufrg4ncnjqz7q";

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

/// Serves canned JSON per URI and counts calls.
#[derive(Default)]
pub struct ScriptedFetcher {
    responses: Mutex<HashMap<String, Value>>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn respond(&self, uri: &str, value: Value) {
        self.responses
            .lock()
            .expect("fetcher poisoned")
            .insert(uri.to_string(), value);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ContentFetcher for ScriptedFetcher {
    fn fetch<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<Value, FetchError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .expect("fetcher poisoned")
                .get(uri)
                .cloned()
                .ok_or_else(|| FetchError::Transport {
                    uri: uri.to_string(),
                    reason: "not found".into(),
                })
        })
    }
}

/// A collection-creating message whose metadata lives at `metadata_uri`.
pub fn create_collection_msg(metadata_uri: &str) -> Value {
    json!({
        "@type": "/badges.MsgUniversalUpdateCollection",
        "creator": ALICE,
        "collectionId": "0",
        "balancesType": "Standard",
        "badgesToCreate": [{
            "amount": "100",
            "badgeIds": [{"start": "1", "end": "1"}],
            "ownershipTimes": [{"start": "1", "end": "18446744073709551615"}]
        }],
        "updateCollectionMetadataTimeline": true,
        "collectionMetadataTimeline": [{
            "timelineTimes": [{"start": "1", "end": "18446744073709551615"}],
            "collectionMetadata": {"uri": metadata_uri, "customData": ""}
        }],
        "updateManagerTimeline": true,
        "managerTimeline": [{
            "timelineTimes": [{"start": "1", "end": "18446744073709551615"}],
            "manager": ALICE
        }]
    })
}

pub fn bank_send_msg(from: &str, to: &str) -> Value {
    json!({
        "@type": "/cosmos.bank.v1beta1.MsgSend",
        "from_address": from,
        "to_address": to,
        "amount": [{"denom": "ubadge", "amount": "1"}]
    })
}

pub fn stored_status(store: &MemoryStore) -> Option<StatusDoc> {
    match store.get(DocKind::Status, STATUS_DOC_ID) {
        Some(Document::Status(status)) => Some(status),
        _ => None,
    }
}

pub async fn wait_for_height(store: &MemoryStore, target: u64, timeout: Duration) -> Result<()> {
    let start = Instant::now();
    loop {
        let current = stored_status(store).map(|status| status.block.height);
        if current.is_some_and(|height| height >= target) {
            return Ok(());
        }
        if start.elapsed() > timeout {
            let reported = current
                .map(|height| height.to_string())
                .unwrap_or_else(|| "<none>".to_owned());
            bail!(
                "indexer did not reach height {target} within {:?} (stored: {reported})",
                timeout
            );
        }
        sleep(Duration::from_millis(50)).await;
    }
}

pub async fn wait_for_count(
    store: &MemoryStore,
    kind: DocKind,
    expected: usize,
    timeout: Duration,
) -> Result<()> {
    let start = Instant::now();
    loop {
        let current = store.count(kind);
        if current >= expected {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!(
                "store held {current} {} documents after {:?}, expected {expected}",
                kind.as_str(),
                timeout
            );
        }
        sleep(Duration::from_millis(50)).await;
    }
}

pub async fn wait_until(
    what: &str,
    timeout: Duration,
    mut condition: impl FnMut() -> bool,
) -> Result<()> {
    let start = Instant::now();
    while !condition() {
        if start.elapsed() > timeout {
            bail!("{what} did not happen within {:?}", timeout);
        }
        sleep(Duration::from_millis(50)).await;
    }
    Ok(())
}
