//! Document store abstraction. The indexer only needs keyed reads, blind
//! writes, insert-if-absent, a per-collection id scan, a queue claim query and
//! multi-document sessions; any backend offering those can sit behind
//! [`DocumentStore`].

pub mod memory;

use crate::model::docs::{
    AccountDoc, ActivityDoc, AddressListDoc, ApprovalTrackerDoc, BalanceDoc, CollectionDoc,
    EmptyBlocksDoc, ErrorDoc, FetchDoc, MerkleChallengeDoc, QueueDoc, RefreshDoc, StatusDoc,
};
use crate::model::ids::{EMPTY_BLOCKS_DOC_ID, STATUS_DOC_ID};
use futures::future::BoxFuture;
use std::fmt;

pub use memory::MemoryStore;

/// Logical collections in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DocKind {
    Status,
    Collections,
    Balances,
    Queue,
    Refreshes,
    ApprovalTrackers,
    MerkleChallenges,
    TransferActivity,
    AddressLists,
    Accounts,
    Fetches,
    Errors,
    EmptyBlocks,
}

impl DocKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocKind::Status => "status",
            DocKind::Collections => "collections",
            DocKind::Balances => "balances",
            DocKind::Queue => "queue",
            DocKind::Refreshes => "refreshes",
            DocKind::ApprovalTrackers => "approvalTrackers",
            DocKind::MerkleChallenges => "merkleChallenges",
            DocKind::TransferActivity => "transferActivity",
            DocKind::AddressLists => "addressLists",
            DocKind::Accounts => "accounts",
            DocKind::Fetches => "fetches",
            DocKind::Errors => "errors",
            DocKind::EmptyBlocks => "emptyBlocks",
        }
    }
}

impl fmt::Display for DocKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    Status(StatusDoc),
    Collection(CollectionDoc),
    Balance(BalanceDoc),
    Queue(QueueDoc),
    Refresh(RefreshDoc),
    ApprovalTracker(ApprovalTrackerDoc),
    MerkleChallenge(MerkleChallengeDoc),
    Activity(ActivityDoc),
    AddressList(AddressListDoc),
    Account(AccountDoc),
    Fetch(FetchDoc),
    Error(ErrorDoc),
    EmptyBlocks(EmptyBlocksDoc),
}

impl Document {
    pub fn kind(&self) -> DocKind {
        match self {
            Document::Status(_) => DocKind::Status,
            Document::Collection(_) => DocKind::Collections,
            Document::Balance(_) => DocKind::Balances,
            Document::Queue(_) => DocKind::Queue,
            Document::Refresh(_) => DocKind::Refreshes,
            Document::ApprovalTracker(_) => DocKind::ApprovalTrackers,
            Document::MerkleChallenge(_) => DocKind::MerkleChallenges,
            Document::Activity(_) => DocKind::TransferActivity,
            Document::AddressList(_) => DocKind::AddressLists,
            Document::Account(_) => DocKind::Accounts,
            Document::Fetch(_) => DocKind::Fetches,
            Document::Error(_) => DocKind::Errors,
            Document::EmptyBlocks(_) => DocKind::EmptyBlocks,
        }
    }

    pub fn id(&self) -> String {
        match self {
            Document::Status(_) => STATUS_DOC_ID.to_string(),
            Document::Collection(doc) => doc.doc_id(),
            Document::Balance(doc) => doc.doc_id(),
            Document::Queue(doc) => doc.id.clone(),
            Document::Refresh(doc) => doc.doc_id(),
            Document::ApprovalTracker(doc) => doc.id.clone(),
            Document::MerkleChallenge(doc) => doc.id.clone(),
            Document::Activity(doc) => doc.id.clone(),
            Document::AddressList(doc) => doc.list_id.clone(),
            Document::Account(doc) => doc.address.clone(),
            Document::Fetch(doc) => doc.uri.clone(),
            Document::Error(doc) => doc.id.clone(),
            Document::EmptyBlocks(_) => EMPTY_BLOCKS_DOC_ID.to_string(),
        }
    }

    /// Owning collection for kinds scoped to one.
    pub fn collection_id(&self) -> Option<u64> {
        match self {
            Document::Collection(doc) => Some(doc.collection_id),
            Document::Balance(doc) => Some(doc.collection_id),
            Document::Queue(doc) => Some(doc.collection_id),
            Document::Refresh(doc) => Some(doc.collection_id),
            Document::ApprovalTracker(doc) => Some(doc.collection_id),
            Document::MerkleChallenge(doc) => Some(doc.collection_id),
            Document::Activity(doc) => Some(doc.collection_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Put(Document),
    Delete { kind: DocKind, id: String },
    InsertUnique(Document),
}

impl WriteOp {
    pub fn kind(&self) -> DocKind {
        match self {
            WriteOp::Put(doc) | WriteOp::InsertUnique(doc) => doc.kind(),
            WriteOp::Delete { kind, .. } => *kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unknown store session {0}")]
    UnknownSession(SessionId),
    #[error("store backend failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage seam used by every component. Writes issued with a session are
/// staged until [`DocumentStore::commit`]; writes without one apply at once.
pub trait DocumentStore: Send + Sync {
    fn get_many<'a>(
        &'a self,
        kind: DocKind,
        ids: &'a [String],
    ) -> BoxFuture<'a, StoreResult<Vec<Document>>>;

    fn put<'a>(&'a self, doc: Document, session: Option<SessionId>)
        -> BoxFuture<'a, StoreResult<()>>;

    fn delete<'a>(
        &'a self,
        kind: DocKind,
        id: &'a str,
        session: Option<SessionId>,
    ) -> BoxFuture<'a, StoreResult<()>>;

    /// Inserts only when no document with the same id exists.
    fn insert_unique<'a>(
        &'a self,
        doc: Document,
        session: Option<SessionId>,
    ) -> BoxFuture<'a, StoreResult<InsertOutcome>>;

    /// Ids of every document of `kind` belonging to `collection_id`.
    fn ids_for_collection<'a>(
        &'a self,
        kind: DocKind,
        collection_id: u64,
    ) -> BoxFuture<'a, StoreResult<Vec<String>>>;

    /// Live queue entries in `partition` due at or before `now`, oldest first.
    fn claim_queue<'a>(
        &'a self,
        partition: u32,
        now: u64,
        limit: usize,
    ) -> BoxFuture<'a, StoreResult<Vec<QueueDoc>>>;

    fn start_session(&self) -> BoxFuture<'_, StoreResult<SessionId>>;

    fn commit(&self, session: SessionId) -> BoxFuture<'_, StoreResult<()>>;

    fn abort(&self, session: SessionId) -> BoxFuture<'_, StoreResult<()>>;

    fn apply<'a>(
        &'a self,
        op: WriteOp,
        session: Option<SessionId>,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            match op {
                WriteOp::Put(doc) => self.put(doc, session).await,
                WriteOp::Delete { kind, id } => self.delete(kind, &id, session).await,
                WriteOp::InsertUnique(doc) => self.insert_unique(doc, session).await.map(|_| ()),
            }
        })
    }
}
