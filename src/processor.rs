//! Block replay: the per-block processor, the catch-up poller that drives it,
//! failover connection handling and the bookkeeping around failed and empty
//! blocks.

pub mod backoff;
pub mod block;
pub mod connection;
pub mod empty_blocks;
pub mod errors;
pub mod poller;

pub use block::{BlockProcessor, BlockReport, DEFAULT_GAS_WINDOW};
pub use connection::ConnectionManager;
pub use empty_blocks::EmptyBlockTracker;
pub use errors::{is_transient, ErrorLog};
pub use poller::{ChainPoller, TickOutcome};
