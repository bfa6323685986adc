//! Tendermint JSON-RPC plumbing: circuit breaker, retry policy, metrics,
//! response decoding and the client that ties them together.

pub mod circuit_breaker;
pub mod client;
pub mod decode;
pub mod factory;
pub mod metrics;
pub mod options;
pub(crate) mod retry;

pub use circuit_breaker::{
    CircuitBreakerError, CircuitBreakerSnapshot, CircuitState, RpcCircuitBreaker,
};
pub use client::{RpcError, TendermintRpcClient};
pub use decode::{JsonTxDecoder, TxDecoder};
pub use factory::TendermintClientFactory;
pub use metrics::RpcMetricsSnapshot;
pub use options::{EventEncoding, RpcClientOptions};
