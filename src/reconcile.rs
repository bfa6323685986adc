//! Reconciles an off-chain balances payload against the stored balance
//! table. Total caps the supply; whatever the payload does not hand out
//! stays with Mint, and a payload that hands out more than exists is
//! rejected without writing anything.

pub mod hash;
pub mod lists;

use crate::cache::{DocsCache, FlushMode, FlushOptions};
use crate::model::balance::{
    balances_equal, dropped_out_zero_entries, Balance, BalanceError, SupplyLedger,
};
use crate::model::docs::{ActivityDoc, ActivityOrigin, BalanceDoc, OffChainSync};
use crate::model::ids::{
    balance_doc_id, parse_balance_doc_id, reconcile_activity_id, MINT_ADDRESS, TOTAL_ADDRESS,
};
use crate::store::{DocKind, DocumentStore};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use hash::{content_hash, parse_balances_map, BalancesMap};

pub const DEFAULT_MAX_ADDRESSES: usize = 15_000;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("balances for {address} exceed the remaining supply")]
    Conservation {
        address: String,
        #[source]
        source: BalanceError,
    },
    #[error("address list {0} does not exist")]
    UnknownList(String),
    #[error("address list {0} is a blacklist")]
    Blacklist(String),
    #[error("address list {0} can only be used on chain")]
    ReservedList(String),
    #[error("{count} addresses exceed the cap of {cap}")]
    TooManyAddresses { count: usize, cap: usize },
    #[error("collection {0} has no Total balance document")]
    MissingTotal(u64),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct ReconcileRequest<'a> {
    pub collection_id: u64,
    pub balances: &'a BalancesMap,
    pub uri: Option<&'a str>,
    pub now: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Payload matched the recorded hash; only freshness moved.
    Unchanged,
    Applied {
        changed_addresses: usize,
        content_hash: String,
    },
}

#[derive(Debug, Clone)]
pub struct BalanceReconciler {
    max_addresses: usize,
}

impl Default for BalanceReconciler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ADDRESSES)
    }
}

impl BalanceReconciler {
    pub fn new(max_addresses: usize) -> Self {
        Self { max_addresses }
    }

    /// Runs one reconciliation and commits it in a single store session.
    pub async fn reconcile(
        &self,
        store: &dyn DocumentStore,
        request: ReconcileRequest<'_>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let mut cache = DocsCache::new();
        let outcome = self.apply(&mut cache, store, &request).await?;

        let session = store
            .start_session()
            .await
            .map_err(|err| anyhow::Error::new(err).context("failed to open store session"))?;
        let flushed = cache
            .flush(
                store,
                FlushMode::SequentialInTransaction(session),
                FlushOptions::default(),
            )
            .await;

        match flushed {
            Ok(summary) => {
                store
                    .commit(session)
                    .await
                    .map_err(|err| anyhow::Error::new(err).context("failed to commit reconciliation"))?;
                info!(
                    collection_id = request.collection_id,
                    writes = summary.writes,
                    outcome = ?outcome,
                    "reconciled off-chain balances"
                );
                Ok(outcome)
            }
            Err(err) => {
                if let Err(abort_err) = store.abort(session).await {
                    warn!(error = %abort_err, "failed to abort reconciliation session");
                }
                Err(err.into())
            }
        }
    }

    /// Computes the reconciliation into `cache` without flushing it.
    pub async fn apply(
        &self,
        cache: &mut DocsCache,
        store: &dyn DocumentStore,
        request: &ReconcileRequest<'_>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let collection_id = request.collection_id;
        let hash = content_hash(request.balances)?;
        let mint_id = balance_doc_id(collection_id, MINT_ADDRESS);
        let total_id = balance_doc_id(collection_id, TOTAL_ADDRESS);

        cache
            .fetch_if_empty::<BalanceDoc>(store, &[mint_id.clone(), total_id.clone()])
            .await?;
        let total = cache
            .get::<BalanceDoc>(&total_id)
            .cloned()
            .ok_or(ReconcileError::MissingTotal(collection_id))?;

        let recorded_hash = total
            .off_chain
            .as_ref()
            .and_then(|sync| sync.content_hash.as_deref());
        if recorded_hash == Some(hash.as_str()) {
            self.bump_freshness(cache, collection_id, request, &hash)?;
            debug!(collection_id, content_hash = %hash, "off-chain balances unchanged");
            return Ok(ReconcileOutcome::Unchanged);
        }

        let recipients =
            lists::expand_recipients(cache, store, request.balances, self.max_addresses).await?;

        let stored_ids = store
            .ids_for_collection(DocKind::Balances, collection_id)
            .await
            .map_err(|err| anyhow::Error::new(err).context("failed to list balance documents"))?;
        let mut ids: BTreeSet<String> = stored_ids.into_iter().collect();
        ids.extend(
            recipients
                .keys()
                .map(|address| balance_doc_id(collection_id, address)),
        );
        let ids: Vec<String> = ids.into_iter().collect();
        cache.fetch_if_empty::<BalanceDoc>(store, &ids).await?;

        // Snapshot and reset every real holder.
        let mut previous: BTreeMap<String, Vec<Balance>> = BTreeMap::new();
        for id in &ids {
            let Some((_, address)) = parse_balance_doc_id(id) else {
                continue;
            };
            if address == MINT_ADDRESS || address == TOTAL_ADDRESS {
                continue;
            }
            if let Some(doc) = cache.get_mut::<BalanceDoc>(id).map_err(anyhow::Error::new)? {
                previous.insert(address.to_string(), std::mem::take(&mut doc.balances));
            }
        }

        let claims = recipients.values().map(Vec::as_slice);
        let mut supply = SupplyLedger::new(&total.balances, claims)
            .map_err(|err| anyhow::Error::new(err).context("total supply is not representable"))?;
        for (address, balances) in &recipients {
            supply
                .subtract(balances)
                .map_err(|source| ReconcileError::Conservation {
                    address: address.clone(),
                    source,
                })?;
        }
        let remaining = supply.remaining();

        let mint = cache
            .get_mut::<BalanceDoc>(&mint_id)
            .map_err(anyhow::Error::new)?
            .map(|doc| std::mem::replace(&mut doc.balances, remaining.clone()));
        if mint.is_none() {
            let mut doc = BalanceDoc::mint(collection_id);
            doc.balances = remaining;
            cache.put(doc).map_err(anyhow::Error::new)?;
        }

        let mut addresses: BTreeSet<&String> = previous.keys().collect();
        addresses.extend(recipients.keys());

        let run_id = Uuid::new_v4().simple().to_string();
        let mut changed_addresses = 0;
        for address in addresses {
            let id = balance_doc_id(collection_id, address);
            let before = previous.get(address).cloned().unwrap_or_default();
            let after = recipients.get(address).cloned().unwrap_or_default();

            if balances_equal(&before, &after) {
                if let Some(doc) = cache.get_mut::<BalanceDoc>(&id).map_err(anyhow::Error::new)? {
                    doc.balances = before;
                }
                cache.discard::<BalanceDoc>(&id);
                continue;
            }

            let zeros = dropped_out_zero_entries(&before, &after);
            let moved = if after.is_empty() { zeros.clone() } else { after.clone() };
            let mut stored = after;
            stored.extend(zeros);

            match cache.get_mut::<BalanceDoc>(&id).map_err(anyhow::Error::new)? {
                Some(doc) => doc.balances = stored,
                None => {
                    let mut doc = BalanceDoc::empty(collection_id, address.as_str());
                    doc.balances = stored;
                    cache.put(doc).map_err(anyhow::Error::new)?;
                }
            }

            cache.record_activity(ActivityDoc {
                id: reconcile_activity_id(collection_id, &run_id, address),
                collection_id,
                from: MINT_ADDRESS.to_string(),
                to: vec![address.clone()],
                balances: moved,
                block: 0,
                timestamp: request.now,
                tx_hash: None,
                origin: ActivityOrigin::OffChainReconcile,
            });
            changed_addresses += 1;
        }

        self.bump_freshness(cache, collection_id, request, &hash)?;
        Ok(ReconcileOutcome::Applied {
            changed_addresses,
            content_hash: hash,
        })
    }

    fn bump_freshness(
        &self,
        cache: &mut DocsCache,
        collection_id: u64,
        request: &ReconcileRequest<'_>,
        hash: &str,
    ) -> Result<(), ReconcileError> {
        for (address, recorded_hash) in [(TOTAL_ADDRESS, Some(hash)), (MINT_ADDRESS, None)] {
            let id = balance_doc_id(collection_id, address);
            let Some(doc) = cache.get_mut::<BalanceDoc>(&id).map_err(anyhow::Error::new)? else {
                continue;
            };
            let sync = doc.off_chain.get_or_insert_with(OffChainSync::default);
            sync.fetched_at = request.now;
            if let Some(uri) = request.uri {
                sync.uri = Some(uri.to_string());
            }
            if let Some(recorded_hash) = recorded_hash {
                sync.content_hash = Some(recorded_hash.to_string());
            }
        }
        Ok(())
    }
}
