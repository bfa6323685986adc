//! Persistence of block-level failures for offline triage.

use crate::model::docs::ErrorDoc;
use crate::rpc::client::{is_connection_refused, RpcError};
use crate::store::{Document, DocumentStore};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// True when the failure is a refused TCP connection, which happens during
/// planned node restarts and is not worth an error document.
pub fn is_transient(err: &anyhow::Error) -> bool {
    if matches!(
        err.downcast_ref::<RpcError>(),
        Some(RpcError::ConnectionRefused { .. })
    ) {
        return true;
    }
    err.chain().any(is_connection_refused)
}

#[derive(Clone)]
pub struct ErrorLog {
    store: Arc<dyn DocumentStore>,
}

impl ErrorLog {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Writes an [`ErrorDoc`] outside any session so it survives the abort of
    /// the block it describes. Returns whether a document was written.
    pub async fn record(&self, context: &str, height: Option<u64>, err: &anyhow::Error, now: u64) -> bool {
        if is_transient(err) {
            debug!(context, ?height, error = %err, "not persisting transient error");
            return false;
        }

        let doc = ErrorDoc {
            id: Uuid::new_v4().to_string(),
            context: context.to_string(),
            error: format!("{err:#}"),
            height,
            timestamp: now,
        };
        match self.store.insert_unique(Document::Error(doc), None).await {
            Ok(_) => true,
            Err(store_err) => {
                warn!(context, ?height, error = %store_err, "failed to persist indexing error");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DocKind, MemoryStore};
    use anyhow::anyhow;

    #[tokio::test]
    async fn refused_connections_are_not_persisted() {
        let store = Arc::new(MemoryStore::new());
        let log = ErrorLog::new(store.clone());

        let refused = anyhow::Error::new(RpcError::ConnectionRefused {
            endpoint: "http://127.0.0.1:26657".into(),
        })
        .context("failed to fetch block 5");
        assert!(!log.record("block", Some(5), &refused, 1).await);

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(!log.record("block", Some(5), &anyhow::Error::new(io), 1).await);
        assert_eq!(store.count(DocKind::Errors), 0);

        assert!(log.record("block", Some(5), &anyhow!("handler failed"), 1).await);
        let stored = store.documents(DocKind::Errors);
        assert_eq!(stored.len(), 1);
        match &stored[0] {
            Document::Error(doc) => {
                assert_eq!(doc.height, Some(5));
                assert_eq!(doc.error, "handler failed");
            }
            other => panic!("unexpected document {other:?}"),
        }
    }
}
