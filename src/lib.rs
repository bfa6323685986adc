pub mod cache;
pub mod chain;
pub mod events;
pub mod faucet;
pub mod handlers;
pub mod model;
pub mod processor;
pub mod queue;
pub mod reconcile;
pub mod rpc;
pub mod runtime;
pub mod store;

pub use cache::{DocsCache, FlushMode, FlushOptions, FlushSummary};
pub use chain::{ChainBlock, ChainClient, ChainClientFactory, ChainTx};
pub use events::EventProcessor;
pub use faucet::{ClaimOutcome, Faucet, FaucetBroadcaster};
pub use handlers::MessageDispatcher;
pub use processor::{BlockProcessor, ChainPoller, ConnectionManager, TickOutcome};
pub use queue::{ContentFetcher, FetchError, FetchQueue, FetchQueueSettings, QueuePolicy};
pub use reconcile::BalanceReconciler;
pub use rpc::circuit_breaker::{CircuitBreakerSnapshot, CircuitState, RpcCircuitBreaker};
pub use rpc::{RpcError, TendermintClientFactory, TendermintRpcClient};
pub use runtime::config::{IndexerConfig, IndexerConfigBuilder, IndexerConfigParams};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use store::{DocKind, Document, DocumentStore, MemoryStore};
