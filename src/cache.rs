//! Per-batch write-behind cache. Handlers read documents through
//! [`DocsCache::fetch_if_empty`] before touching them; everything they change
//! is held here until [`DocsCache::flush`] writes it out in one go.

pub mod flush;

use crate::model::docs::{
    AccountDoc, ActivityDoc, AddressListDoc, ApprovalTrackerDoc, BalanceDoc, CollectionDoc,
    ErrorDoc, FetchDoc, MerkleChallengeDoc, QueueDoc, RefreshDoc, StatusDoc,
};
use crate::model::ids::STATUS_DOC_ID;
use crate::store::{DocKind, Document, DocumentStore, WriteOp};
use anyhow::{Context, Result};
use std::collections::{BTreeSet, HashMap};

pub use flush::{FlushMode, FlushOptions, FlushSummary};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// A write was attempted on a document that was never loaded.
    #[error("{kind} document {id} was written before being loaded")]
    NotLoaded { kind: DocKind, id: String },
    #[error("status document was not loaded")]
    StatusNotLoaded,
}

#[derive(Debug, Clone)]
struct Slot<T> {
    current: Option<T>,
    dirty: bool,
    /// The store had no such document when it was loaded.
    loaded_absent: bool,
}

/// Resident documents of one kind. A resident id may map to `None`, meaning
/// the store was asked and has no such document.
#[derive(Debug, Clone)]
pub struct DocMap<T> {
    slots: HashMap<String, Slot<T>>,
}

impl<T> Default for DocMap<T> {
    fn default() -> Self {
        Self {
            slots: HashMap::new(),
        }
    }
}

impl<T: Clone> DocMap<T> {
    fn is_resident(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    fn load(&mut self, id: String, doc: Option<T>) {
        let loaded_absent = doc.is_none();
        self.slots.entry(id).or_insert(Slot {
            current: doc,
            dirty: false,
            loaded_absent,
        });
    }

    fn get(&self, id: &str) -> Option<&T> {
        self.slots.get(id).and_then(|slot| slot.current.as_ref())
    }

    fn dirty_docs(&self) -> impl Iterator<Item = &T> {
        self.dirty_slots().map(|(doc, _)| doc)
    }

    fn dirty_slots(&self) -> impl Iterator<Item = (&T, bool)> {
        self.slots
            .values()
            .filter(|slot| slot.dirty)
            .filter_map(|slot| slot.current.as_ref().map(|doc| (doc, slot.loaded_absent)))
    }

    fn resident_docs(&self) -> impl Iterator<Item = (&String, &T)> {
        self.slots
            .iter()
            .filter_map(|(id, slot)| slot.current.as_ref().map(|doc| (id, doc)))
    }
}

/// Document kinds that live in the cache's keyed maps.
pub trait CachedDoc: Clone + Send + Sync + 'static {
    const KIND: DocKind;

    fn cache_id(&self) -> String;
    fn into_document(self) -> Document;
    fn from_document(document: Document) -> Option<Self>;
    fn slots(cache: &DocsCache) -> &DocMap<Self>;
    fn slots_mut(cache: &mut DocsCache) -> &mut DocMap<Self>;

    fn owning_collection(&self) -> Option<u64> {
        None
    }
}

macro_rules! cached_doc {
    ($ty:ty, $kind:expr, $variant:ident, $field:ident, |$doc:ident| $id:expr, $collection:expr) => {
        impl CachedDoc for $ty {
            const KIND: DocKind = $kind;

            fn cache_id(&self) -> String {
                let $doc = self;
                $id
            }

            fn into_document(self) -> Document {
                Document::$variant(self)
            }

            fn from_document(document: Document) -> Option<Self> {
                match document {
                    Document::$variant(doc) => Some(doc),
                    _ => None,
                }
            }

            fn slots(cache: &DocsCache) -> &DocMap<Self> {
                &cache.$field
            }

            fn slots_mut(cache: &mut DocsCache) -> &mut DocMap<Self> {
                &mut cache.$field
            }

            fn owning_collection(&self) -> Option<u64> {
                let collection: fn(&Self) -> Option<u64> = $collection;
                collection(self)
            }
        }
    };
}

cached_doc!(CollectionDoc, DocKind::Collections, Collection, collections, |doc| doc.doc_id(), |doc| Some(doc.collection_id));
cached_doc!(BalanceDoc, DocKind::Balances, Balance, balances, |doc| doc.doc_id(), |doc| Some(doc.collection_id));
cached_doc!(RefreshDoc, DocKind::Refreshes, Refresh, refreshes, |doc| doc.doc_id(), |doc| Some(doc.collection_id));
cached_doc!(ApprovalTrackerDoc, DocKind::ApprovalTrackers, ApprovalTracker, approval_trackers, |doc| doc.id.clone(), |doc| Some(doc.collection_id));
cached_doc!(MerkleChallengeDoc, DocKind::MerkleChallenges, MerkleChallenge, merkle_challenges, |doc| doc.id.clone(), |doc| Some(doc.collection_id));
cached_doc!(AddressListDoc, DocKind::AddressLists, AddressList, address_lists, |doc| doc.list_id.clone(), |_| None);
cached_doc!(AccountDoc, DocKind::Accounts, Account, accounts, |doc| doc.address.clone(), |_| None);
cached_doc!(FetchDoc, DocKind::Fetches, Fetch, fetches, |doc| doc.uri.clone(), |_| None);

#[derive(Debug, Default)]
pub struct DocsCache {
    status: Option<StatusDoc>,
    collections: DocMap<CollectionDoc>,
    balances: DocMap<BalanceDoc>,
    refreshes: DocMap<RefreshDoc>,
    approval_trackers: DocMap<ApprovalTrackerDoc>,
    merkle_challenges: DocMap<MerkleChallengeDoc>,
    address_lists: DocMap<AddressListDoc>,
    accounts: DocMap<AccountDoc>,
    fetches: DocMap<FetchDoc>,
    queue: Vec<QueueDoc>,
    activity: Vec<ActivityDoc>,
    errors: Vec<ErrorDoc>,
    deletions: BTreeSet<(DocKind, String)>,
}

impl DocsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache seeded with the caller's in-memory view of progress.
    pub fn with_status(status: StatusDoc) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Loads the given ids that are not yet resident. Ids the store does not
    /// know become resident as absent, so later reads skip the round trip.
    pub async fn fetch_if_empty<T: CachedDoc>(
        &mut self,
        store: &dyn DocumentStore,
        ids: &[String],
    ) -> Result<()> {
        let slots = T::slots(self);
        let mut missing: Vec<String> = ids
            .iter()
            .filter(|id| !slots.is_resident(id))
            .cloned()
            .collect();
        missing.sort();
        missing.dedup();
        if missing.is_empty() {
            return Ok(());
        }

        let mut found: HashMap<String, T> = store
            .get_many(T::KIND, &missing)
            .await
            .with_context(|| format!("failed to load {} {} documents", missing.len(), T::KIND))?
            .into_iter()
            .filter_map(T::from_document)
            .map(|doc| (doc.cache_id(), doc))
            .collect();

        let slots = T::slots_mut(self);
        for id in missing {
            let doc = found.remove(&id);
            slots.load(id, doc);
        }
        Ok(())
    }

    pub async fn load_status(&mut self, store: &dyn DocumentStore) -> Result<()> {
        if self.status.is_some() {
            return Ok(());
        }
        let ids = [STATUS_DOC_ID.to_string()];
        let loaded = store
            .get_many(DocKind::Status, &ids)
            .await
            .context("failed to load status document")?
            .into_iter()
            .find_map(|doc| match doc {
                Document::Status(status) => Some(status),
                _ => None,
            });
        self.status = Some(loaded.unwrap_or_else(StatusDoc::genesis));
        Ok(())
    }

    pub fn status(&self) -> Option<&StatusDoc> {
        self.status.as_ref()
    }

    pub fn status_mut(&mut self) -> Result<&mut StatusDoc, CacheError> {
        self.status.as_mut().ok_or(CacheError::StatusNotLoaded)
    }

    pub fn is_resident<T: CachedDoc>(&self, id: &str) -> bool {
        T::slots(self).is_resident(id)
    }

    pub fn get<T: CachedDoc>(&self, id: &str) -> Option<&T> {
        T::slots(self).get(id)
    }

    /// Mutable access to a resident document; marks it for write-back.
    pub fn get_mut<T: CachedDoc>(&mut self, id: &str) -> Result<Option<&mut T>, CacheError> {
        let slot = T::slots_mut(self)
            .slots
            .get_mut(id)
            .ok_or_else(|| CacheError::NotLoaded {
                kind: T::KIND,
                id: id.to_string(),
            })?;
        if slot.current.is_none() {
            return Ok(None);
        }
        slot.dirty = true;
        Ok(slot.current.as_mut())
    }

    /// Replaces a resident document.
    pub fn put<T: CachedDoc>(&mut self, doc: T) -> Result<(), CacheError> {
        let id = doc.cache_id();
        let slot = T::slots_mut(self)
            .slots
            .get_mut(&id)
            .ok_or_else(|| CacheError::NotLoaded {
                kind: T::KIND,
                id: id.clone(),
            })?;
        slot.current = Some(doc);
        slot.dirty = true;
        self.deletions.remove(&(T::KIND, id));
        Ok(())
    }

    /// Drops the pending write for a document, keeping it resident.
    pub fn discard<T: CachedDoc>(&mut self, id: &str) {
        if let Some(slot) = T::slots_mut(self).slots.get_mut(id) {
            slot.dirty = false;
        }
    }

    /// Schedules a delete. The id stays resident as absent.
    pub fn delete<T: CachedDoc>(&mut self, id: &str) {
        T::slots_mut(self).slots.insert(
            id.to_string(),
            Slot {
                current: None,
                dirty: false,
                loaded_absent: false,
            },
        );
        self.deletions.insert((T::KIND, id.to_string()));
    }

    /// Deletes every resident document of `T` owned by `collection_id`.
    pub fn purge_collection<T: CachedDoc>(&mut self, collection_id: u64) {
        let ids: Vec<String> = T::slots(self)
            .resident_docs()
            .filter(|(_, doc)| doc.owning_collection() == Some(collection_id))
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            self.delete::<T>(&id);
        }
    }

    pub fn enqueue(&mut self, entry: QueueDoc) {
        if !self.queue.iter().any(|queued| queued.id == entry.id) {
            self.queue.push(entry);
        }
    }

    pub fn record_activity(&mut self, activity: ActivityDoc) {
        if !self.activity.iter().any(|recorded| recorded.id == activity.id) {
            self.activity.push(activity);
        }
    }

    pub fn record_error(&mut self, error: ErrorDoc) {
        self.errors.push(error);
    }

    pub fn queued(&self) -> &[QueueDoc] {
        &self.queue
    }

    pub fn activity(&self) -> &[ActivityDoc] {
        &self.activity
    }

    /// Writes the batch would produce, excluding the status document.
    pub fn pending_writes(&self) -> Vec<WriteOp> {
        let mut ops: Vec<WriteOp> = self
            .deletions
            .iter()
            .map(|(kind, id)| WriteOp::Delete {
                kind: *kind,
                id: id.clone(),
            })
            .collect();

        push_dirty(&mut ops, &self.collections);
        push_dirty(&mut ops, &self.balances);
        push_dirty(&mut ops, &self.refreshes);
        push_dirty(&mut ops, &self.approval_trackers);
        push_dirty(&mut ops, &self.merkle_challenges);
        push_dirty(&mut ops, &self.address_lists);
        push_first_seen(&mut ops, &self.accounts);
        push_dirty(&mut ops, &self.fetches);

        ops.extend(
            self.queue
                .iter()
                .cloned()
                .map(|entry| WriteOp::InsertUnique(Document::Queue(entry))),
        );
        ops.extend(
            self.activity
                .iter()
                .cloned()
                .map(|activity| WriteOp::InsertUnique(Document::Activity(activity))),
        );
        ops.extend(
            self.errors
                .iter()
                .cloned()
                .map(|error| WriteOp::InsertUnique(Document::Error(error))),
        );
        ops
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.pending_writes().is_empty()
    }
}

fn push_dirty<T: CachedDoc>(ops: &mut Vec<WriteOp>, slots: &DocMap<T>) {
    let mut dirty: Vec<T> = slots.dirty_docs().cloned().collect();
    dirty.sort_by_key(|doc| doc.cache_id());
    ops.extend(dirty.into_iter().map(|doc| WriteOp::Put(doc.into_document())));
}

/// Accounts created in this batch are inserted only if still absent. The
/// faucet writes the same documents outside block processing and its
/// airdrop marker must survive a block that registered the address first.
fn push_first_seen<T: CachedDoc>(ops: &mut Vec<WriteOp>, slots: &DocMap<T>) {
    let mut dirty: Vec<(T, bool)> = slots
        .dirty_slots()
        .map(|(doc, created)| (doc.clone(), created))
        .collect();
    dirty.sort_by_key(|(doc, _)| doc.cache_id());
    ops.extend(dirty.into_iter().map(|(doc, created)| {
        if created {
            WriteOp::InsertUnique(doc.into_document())
        } else {
            WriteOp::Put(doc.into_document())
        }
    }));
}
