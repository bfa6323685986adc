//! In-process [`DocumentStore`] backed by ordered maps. Used by tests and by
//! single-node deployments that do not need durability.

use super::{
    DocKind, Document, DocumentStore, InsertOutcome, SessionId, StoreError, StoreResult, WriteOp,
};
use crate::model::docs::QueueDoc;
use futures::future::BoxFuture;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

type Key = (DocKind, String);

#[derive(Default)]
struct MemoryState {
    docs: BTreeMap<Key, Document>,
    sessions: HashMap<SessionId, Vec<WriteOp>>,
    failing_kind: Option<DocKind>,
}

impl MemoryState {
    fn contains(&self, key: &Key, staged: Option<&[WriteOp]>) -> bool {
        let mut present = self.docs.contains_key(key);
        for op in staged.unwrap_or_default() {
            match op {
                WriteOp::Put(doc) | WriteOp::InsertUnique(doc)
                    if doc.kind() == key.0 && doc.id() == key.1 =>
                {
                    present = true
                }
                WriteOp::Delete { kind, id } if *kind == key.0 && *id == key.1 => present = false,
                _ => {}
            }
        }
        present
    }

    fn apply(&mut self, op: WriteOp) -> InsertOutcome {
        match op {
            WriteOp::Put(doc) => {
                self.docs.insert((doc.kind(), doc.id()), doc);
                InsertOutcome::Inserted
            }
            WriteOp::Delete { kind, id } => {
                self.docs.remove(&(kind, id));
                InsertOutcome::Inserted
            }
            WriteOp::InsertUnique(doc) => {
                let key = (doc.kind(), doc.id());
                if self.docs.contains_key(&key) {
                    InsertOutcome::Duplicate
                } else {
                    self.docs.insert(key, doc);
                    InsertOutcome::Inserted
                }
            }
        }
    }

    fn check_failure(&self, kind: DocKind) -> StoreResult<()> {
        match self.failing_kind {
            Some(failing) if failing == kind => Err(StoreError::Backend(format!(
                "injected write failure for {kind}"
            ))),
            _ => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    next_session: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write of `kind` fail until cleared.
    pub fn fail_writes_for(&self, kind: Option<DocKind>) {
        self.lock().failing_kind = kind;
    }

    /// Committed documents of one kind, ordered by id.
    pub fn documents(&self, kind: DocKind) -> Vec<Document> {
        self.lock()
            .docs
            .range((kind, String::new())..)
            .take_while(|((doc_kind, _), _)| *doc_kind == kind)
            .map(|(_, doc)| doc.clone())
            .collect()
    }

    pub fn get(&self, kind: DocKind, id: &str) -> Option<Document> {
        self.lock().docs.get(&(kind, id.to_string())).cloned()
    }

    pub fn count(&self, kind: DocKind) -> usize {
        self.documents(kind).len()
    }

    pub fn open_sessions(&self) -> usize {
        self.lock().sessions.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().expect("memory store mutex poisoned")
    }

    fn write(&self, op: WriteOp, session: Option<SessionId>) -> StoreResult<InsertOutcome> {
        let mut state = self.lock();
        state.check_failure(op.kind())?;

        let Some(session) = session else {
            return Ok(state.apply(op));
        };

        let outcome = match &op {
            WriteOp::InsertUnique(doc) => {
                let key = (doc.kind(), doc.id());
                let staged = state.sessions.get(&session).map(Vec::as_slice);
                if state.contains(&key, staged) {
                    InsertOutcome::Duplicate
                } else {
                    InsertOutcome::Inserted
                }
            }
            _ => InsertOutcome::Inserted,
        };

        let staged = state
            .sessions
            .get_mut(&session)
            .ok_or(StoreError::UnknownSession(session))?;
        if outcome == InsertOutcome::Inserted {
            staged.push(op);
        }
        Ok(outcome)
    }
}

impl DocumentStore for MemoryStore {
    fn get_many<'a>(
        &'a self,
        kind: DocKind,
        ids: &'a [String],
    ) -> BoxFuture<'a, StoreResult<Vec<Document>>> {
        Box::pin(async move {
            let state = self.lock();
            Ok(ids
                .iter()
                .filter_map(|id| state.docs.get(&(kind, id.clone())).cloned())
                .collect())
        })
    }

    fn put<'a>(
        &'a self,
        doc: Document,
        session: Option<SessionId>,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move { self.write(WriteOp::Put(doc), session).map(|_| ()) })
    }

    fn delete<'a>(
        &'a self,
        kind: DocKind,
        id: &'a str,
        session: Option<SessionId>,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            self.write(
                WriteOp::Delete {
                    kind,
                    id: id.to_string(),
                },
                session,
            )
            .map(|_| ())
        })
    }

    fn insert_unique<'a>(
        &'a self,
        doc: Document,
        session: Option<SessionId>,
    ) -> BoxFuture<'a, StoreResult<InsertOutcome>> {
        Box::pin(async move { self.write(WriteOp::InsertUnique(doc), session) })
    }

    fn ids_for_collection<'a>(
        &'a self,
        kind: DocKind,
        collection_id: u64,
    ) -> BoxFuture<'a, StoreResult<Vec<String>>> {
        Box::pin(async move {
            Ok(self
                .documents(kind)
                .into_iter()
                .filter(|doc| doc.collection_id() == Some(collection_id))
                .map(|doc| doc.id())
                .collect())
        })
    }

    fn claim_queue<'a>(
        &'a self,
        partition: u32,
        now: u64,
        limit: usize,
    ) -> BoxFuture<'a, StoreResult<Vec<QueueDoc>>> {
        Box::pin(async move {
            let mut due: Vec<QueueDoc> = self
                .documents(DocKind::Queue)
                .into_iter()
                .filter_map(|doc| match doc {
                    Document::Queue(entry) => Some(entry),
                    _ => None,
                })
                .filter(|entry| {
                    entry.is_live()
                        && entry.load_balance_id == partition
                        && entry.next_fetch_time <= now
                })
                .collect();
            due.sort_by(|lhs, rhs| {
                (lhs.next_fetch_time, &lhs.id).cmp(&(rhs.next_fetch_time, &rhs.id))
            });
            due.truncate(limit);
            Ok(due)
        })
    }

    fn start_session(&self) -> BoxFuture<'_, StoreResult<SessionId>> {
        Box::pin(async move {
            let session = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
            self.lock().sessions.insert(session, Vec::new());
            Ok(session)
        })
    }

    fn commit(&self, session: SessionId) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            let mut state = self.lock();
            let staged = state
                .sessions
                .remove(&session)
                .ok_or(StoreError::UnknownSession(session))?;
            for op in staged {
                state.apply(op);
            }
            Ok(())
        })
    }

    fn abort(&self, session: SessionId) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            self.lock()
                .sessions
                .remove(&session)
                .map(|_| ())
                .ok_or(StoreError::UnknownSession(session))
        })
    }
}
