//! Per-message handlers. Split across submodules:
//! - `messages`: typed decoding of transaction messages
//! - `context`: the cache/store/tx bundle every handler works against
//! - `dispatcher`: routes a decoded message to its handler
//! - one module per handled message family
//!
//! Handlers load everything they read through `DocsCache::fetch_if_empty`
//! and never assume another handler already did.

mod accounts;
mod address_lists;
mod collection;
mod context;
mod delete;
mod dispatcher;
pub mod messages;
mod transfer;
mod user_approvals;

#[cfg(test)]
mod tests;

pub use accounts::register_addresses;
pub use context::{HandlerContext, TxInfo};
pub use dispatcher::MessageDispatcher;
pub use messages::{ChainMsg, MessageError, Transfer};
pub use transfer::apply_transfer;
