//! Tendermint JSON-RPC client. Wraps `status`, `block` and `block_results`
//! with breaker gating, bounded retries, timeouts and metrics, and exposes
//! the result as a [`ChainClient`].

use crate::chain::{ChainBlock, ChainClient};
use crate::rpc::circuit_breaker::{CircuitBreakerError, RpcCircuitBreaker};
use crate::rpc::decode::{
    assemble_block, BlockResponse, BlockResultsResponse, JsonTxDecoder, StatusResponse, TxDecoder,
};
use crate::rpc::metrics::{RpcMetrics, RpcMetricsSnapshot};
use crate::rpc::options::RpcClientOptions;
use crate::rpc::retry::{RetryContext, BLOCK_RESULTS_RETRY, BLOCK_RETRY, STATUS_RETRY};
use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use jsonrpsee::core::{
    client::{ClientT, Error as JsonRpcError},
    http_helpers::HttpError,
    params::ObjectParams,
};
use jsonrpsee::http_client::transport::Error as HttpTransportError;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::time::{sleep, timeout, Instant};

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("rpc method {method} timed out")]
    Timeout { method: &'static str },
    #[error("rpc circuit breaker is open")]
    CircuitOpen,
    #[error("height {height} is not yet available")]
    HeightNotAvailable { height: u64 },
    #[error("connection refused by {endpoint}")]
    ConnectionRefused { endpoint: String },
    #[error("rpc {method} response exceeded the configured size limit")]
    ResponseTooLarge { method: &'static str },
    #[error("rpc {method} returned an unexpected payload: {reason}")]
    MalformedResponse { method: &'static str, reason: String },
}

#[derive(Clone)]
pub struct TendermintRpcClient {
    endpoint: Arc<String>,
    client: HttpClient,
    options: RpcClientOptions,
    metrics: Arc<RpcMetrics>,
    breaker: Arc<RpcCircuitBreaker>,
    decoder: Arc<dyn TxDecoder>,
}

impl std::fmt::Debug for TendermintRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TendermintRpcClient")
            .field("endpoint", &self.endpoint)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ChainClient for TendermintRpcClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn latest_height(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(self.latest_height())
    }

    fn fetch_block(&self, height: u64) -> BoxFuture<'_, Result<ChainBlock>> {
        Box::pin(self.fetch_block(height))
    }
}

impl TendermintRpcClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::with_options(url, RpcClientOptions::default())
    }

    pub fn with_options(url: impl Into<String>, options: RpcClientOptions) -> Result<Self> {
        let url = url.into();
        let breaker = Arc::new(RpcCircuitBreaker::default().for_endpoint(&url));
        Self::with_parts(url, options, breaker, Arc::new(JsonTxDecoder))
    }

    pub fn with_parts(
        url: impl Into<String>,
        options: RpcClientOptions,
        breaker: Arc<RpcCircuitBreaker>,
        decoder: Arc<dyn TxDecoder>,
    ) -> Result<Self> {
        options.validate()?;
        let endpoint = url.into();
        let max_response_body_size = options.max_response_body_bytes.min(u32::MAX as usize) as u32;

        let client = HttpClientBuilder::default()
            .request_timeout(options.request_timeout)
            .max_concurrent_requests(options.max_concurrent_requests)
            .max_response_size(max_response_body_size)
            .build(&endpoint)
            .map_err(|err| anyhow!("failed to build RPC client for {endpoint}: {err}"))?;

        Ok(Self {
            endpoint: Arc::new(endpoint),
            client,
            options,
            metrics: Arc::new(RpcMetrics::default()),
            breaker,
            decoder,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn metrics(&self) -> RpcMetricsSnapshot {
        self.metrics.snapshot(self.breaker.snapshot().state)
    }

    pub async fn latest_height(&self) -> Result<u64> {
        let status: StatusResponse = self
            .retry_with_breaker(
                RetryContext::new(&self.endpoint, &STATUS_RETRY),
                || self.request("status", ObjectParams::new()),
            )
            .await?;
        Ok(status.sync_info.latest_block_height)
    }

    pub async fn block(&self, height: u64) -> Result<BlockResponse> {
        self.retry_with_breaker(
            RetryContext::at_height(&self.endpoint, &BLOCK_RETRY, height),
            || self.request_at_height("block", height),
        )
        .await
    }

    pub async fn block_results(&self, height: u64) -> Result<BlockResultsResponse> {
        self.retry_with_breaker(
            RetryContext::at_height(&self.endpoint, &BLOCK_RESULTS_RETRY, height),
            || self.request_at_height("block_results", height),
        )
        .await
    }

    pub async fn fetch_block(&self, height: u64) -> Result<ChainBlock> {
        let (block, results) = futures::try_join!(self.block(height), self.block_results(height))?;
        assemble_block(block, results, self.decoder.as_ref(), self.options.event_encoding)
    }

    /// Breaker-gated retry loop shared by every method. Timeouts and
    /// transport failures are retried with exponential backoff; refused
    /// connections and unavailable heights return at once so the caller can
    /// rotate or wait.
    async fn retry_with_breaker<T, F, Fut>(
        &self,
        context: RetryContext<'_>,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            match self.breaker.before_request() {
                Ok(state) => context.log_permit(state),
                Err(CircuitBreakerError::CircuitOpen) => {
                    context.log_circuit_open();
                    return Err(RpcError::CircuitOpen.into());
                }
            }

            attempt += 1;
            let start = Instant::now();

            let err = match operation().await {
                Ok(value) => {
                    self.metrics.record_success(start.elapsed());
                    self.breaker.record_success();
                    tracing::trace!(endpoint = %self.endpoint, method = context.method(), attempt, "rpc call completed");
                    return Ok(value);
                }
                Err(err) => err,
            };

            let elapsed = start.elapsed();
            let backoff = self.backoff_delay(attempt);
            match err.downcast_ref::<RpcError>() {
                Some(RpcError::HeightNotAvailable { .. }) => {
                    self.metrics.record_success(elapsed);
                    self.breaker.record_success();
                    context.log_unavailable(attempt);
                    return Err(err);
                }
                Some(RpcError::ConnectionRefused { .. }) => {
                    self.metrics.record_connection_refused(elapsed);
                    self.breaker.record_failure();
                    return Err(err);
                }
                Some(RpcError::ResponseTooLarge { .. }) => {
                    self.metrics.record_failure(elapsed);
                    self.breaker.record_success();
                    context.log_exhausted(attempt, &err);
                    return Err(err);
                }
                Some(RpcError::Timeout { .. }) => {
                    self.metrics.record_timeout(elapsed);
                    self.breaker.record_failure();
                    if attempt < self.options.max_attempts {
                        context.log_timeout(attempt, backoff);
                    }
                }
                _ => {
                    self.metrics.record_failure(elapsed);
                    self.breaker.record_failure();
                }
            }

            if attempt >= self.options.max_attempts {
                context.log_exhausted(attempt, &err);
                return Err(err);
            }
            context.log_retry(attempt, backoff, &err);
            sleep(backoff).await;
        }
    }

    async fn request_at_height<R: DeserializeOwned>(&self, method: &'static str, height: u64) -> Result<R> {
        let mut params = ObjectParams::new();
        params
            .insert("height", height.to_string())
            .map_err(|err| anyhow!("failed to encode {method} params: {err}"))?;
        self.request(method, params)
            .await
            .map_err(|err| match err.downcast_ref::<RpcError>() {
                Some(RpcError::MalformedResponse { reason, .. }) if is_height_unavailable(reason) => {
                    RpcError::HeightNotAvailable { height }.into()
                }
                _ => err,
            })
    }

    async fn request<R: DeserializeOwned>(&self, method: &'static str, params: ObjectParams) -> Result<R> {
        let value: Value = timeout(self.options.request_timeout, self.client.request(method, params))
            .await
            .map_err(|_| RpcError::Timeout { method })?
            .map_err(|err| map_rpc_error(&self.endpoint, method, err))?;

        serde_json::from_value(value).map_err(|err| {
            RpcError::MalformedResponse {
                method,
                reason: err.to_string(),
            }
            .into()
        })
    }

    fn backoff_delay(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as u32;
        let delay = self
            .options
            .initial_backoff
            .saturating_mul(1u32 << exponent);
        delay.min(self.options.max_backoff)
    }
}

fn is_height_unavailable(reason: &str) -> bool {
    reason.contains("must be less than or equal to the current blockchain height")
        || reason.contains("could not find results for height")
}

fn map_rpc_error(endpoint: &str, method: &'static str, err: JsonRpcError) -> anyhow::Error {
    if response_too_large(&err) {
        return RpcError::ResponseTooLarge { method }.into();
    }
    match &err {
        JsonRpcError::Call(call) => {
            let detail = call
                .data()
                .map(|data| format!("{} {}", call.message(), data.get()))
                .unwrap_or_else(|| call.message().to_string());
            RpcError::MalformedResponse {
                method,
                reason: detail,
            }
            .into()
        }
        JsonRpcError::RequestTimeout => RpcError::Timeout { method }.into(),
        JsonRpcError::Transport(inner) if is_connection_refused(inner.as_ref()) => {
            RpcError::ConnectionRefused {
                endpoint: endpoint.to_string(),
            }
            .into()
        }
        _ => anyhow!("rpc {method} call to {endpoint} failed: {err}"),
    }
}

fn response_too_large(err: &JsonRpcError) -> bool {
    match err {
        JsonRpcError::Transport(inner) => match inner.downcast_ref::<HttpTransportError>() {
            Some(HttpTransportError::Http(http_err)) => matches!(http_err, HttpError::TooLarge),
            Some(HttpTransportError::RequestTooLarge) => true,
            _ => false,
        },
        _ => false,
    }
}

/// Walks the source chain looking for a refused TCP connection.
pub(crate) fn is_connection_refused(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(source) = current {
        if let Some(io) = source.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        let message = source.to_string();
        if message.contains("Connection refused") || message.contains("ECONNREFUSED") {
            return true;
        }
        current = source.source();
    }
    false
}
