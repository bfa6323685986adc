use crate::chain::{ChainClient, ChainClientFactory};
use crate::rpc::circuit_breaker::RpcCircuitBreaker;
use crate::rpc::client::TendermintRpcClient;
use crate::rpc::decode::{JsonTxDecoder, TxDecoder};
use crate::rpc::options::RpcClientOptions;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Builds [`TendermintRpcClient`]s and probes them with a `status` call. Each
/// endpoint keeps one breaker for the life of the factory so reconnecting to
/// a node that keeps failing stays gated.
pub struct TendermintClientFactory {
    options: RpcClientOptions,
    decoder: Arc<dyn TxDecoder>,
    breakers: Mutex<HashMap<String, Arc<RpcCircuitBreaker>>>,
}

impl TendermintClientFactory {
    pub fn new(options: RpcClientOptions) -> Self {
        Self::with_decoder(options, Arc::new(JsonTxDecoder))
    }

    pub fn with_decoder(options: RpcClientOptions, decoder: Arc<dyn TxDecoder>) -> Self {
        Self {
            options,
            decoder,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    fn breaker_for(&self, endpoint: &str) -> Arc<RpcCircuitBreaker> {
        let mut breakers = self.breakers.lock().expect("breaker registry mutex poisoned");
        breakers
            .entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(RpcCircuitBreaker::default().for_endpoint(endpoint)))
            .clone()
    }
}

impl ChainClientFactory for TendermintClientFactory {
    fn connect<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, Result<Arc<dyn ChainClient>>> {
        Box::pin(async move {
            let client = TendermintRpcClient::with_parts(
                endpoint,
                self.options.clone(),
                self.breaker_for(endpoint),
                self.decoder.clone(),
            )?;
            let height = client
                .latest_height()
                .await
                .with_context(|| format!("endpoint {endpoint} did not answer status"))?;
            debug!(endpoint, height, "rpc endpoint reachable");
            Ok(Arc::new(client) as Arc<dyn ChainClient>)
        })
    }
}
