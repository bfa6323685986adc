use futures::future::BoxFuture;
use std::time::Duration;
use tokio::time::timeout;

pub const IPFS_SCHEME: &str = "ipfs://";

/// Content-addressed URIs never change, so their payloads are kept forever.
pub fn is_permanent_uri(uri: &str) -> bool {
    uri.starts_with(IPFS_SCHEME)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("fetching {uri} timed out after {after:?}")]
    Timeout { uri: String, after: Duration },
    #[error("fetching {uri} failed: {reason}")]
    Transport { uri: String, reason: String },
    #[error("content at {uri} is invalid: {reason}")]
    InvalidContent { uri: String, reason: String },
}

/// Retrieves off-chain JSON content. Implementations route `ipfs://` URIs to a
/// content-addressed gateway and everything else to plain HTTP.
pub trait ContentFetcher: Send + Sync {
    fn fetch<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<serde_json::Value, FetchError>>;
}

/// Races the fetch against `limit`; a timeout is an ordinary failure.
pub async fn fetch_with_timeout(
    fetcher: &dyn ContentFetcher,
    uri: &str,
    limit: Duration,
) -> Result<serde_json::Value, FetchError> {
    match timeout(limit, fetcher.fetch(uri)).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout {
            uri: uri.to_string(),
            after: limit,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stalled;

    impl ContentFetcher for Stalled {
        fn fetch<'a>(
            &'a self,
            _uri: &'a str,
        ) -> BoxFuture<'a, Result<serde_json::Value, FetchError>> {
            Box::pin(futures::future::pending())
        }
    }

    #[tokio::test]
    async fn slow_fetch_times_out() {
        let err = fetch_with_timeout(&Stalled, "https://slow", Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout { .. }));
    }

    #[test]
    fn ipfs_uris_are_permanent() {
        assert!(is_permanent_uri("ipfs://Qm123"));
        assert!(!is_permanent_uri("https://example.com/a.json"));
    }
}
