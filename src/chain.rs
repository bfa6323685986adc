//! Chain-facing data the processor consumes, independent of how it was
//! fetched.

use anyhow::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    #[serde(deserialize_with = "crate::model::uint_range::deserialize_uint")]
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttribute {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Vec<EventAttribute>,
}

impl TxEvent {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attribute| attribute.key == key)
            .map(|attribute| attribute.value.as_str())
    }
}

/// Transaction body after decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTx {
    /// Messages as JSON objects tagged with `@type`.
    pub messages: Vec<serde_json::Value>,
    pub fee: Vec<Coin>,
    pub gas_limit: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TxBody {
    Decoded(DecodedTx),
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainTx {
    pub index: u64,
    pub hash: String,
    pub code: u32,
    pub log: String,
    pub gas_wanted: u64,
    pub gas_used: u64,
    pub body: TxBody,
    pub events: Vec<TxEvent>,
}

impl ChainTx {
    pub fn succeeded(&self) -> bool {
        self.code == 0
    }

    /// Fee per unit of gas in the first fee denomination, when one was paid.
    pub fn gas_price(&self) -> Option<f64> {
        let TxBody::Decoded(decoded) = &self.body else {
            return None;
        };
        let fee = decoded.fee.first()?;
        let gas = if decoded.gas_limit > 0 {
            decoded.gas_limit
        } else {
            self.gas_wanted
        };
        (gas > 0 && fee.amount > 0).then(|| fee.amount as f64 / gas as f64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainBlock {
    pub height: u64,
    /// Block time in unix milliseconds.
    pub timestamp: u64,
    pub txs: Vec<ChainTx>,
}

impl ChainBlock {
    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }
}

/// Read access to a chain endpoint.
pub trait ChainClient: Send + Sync {
    fn endpoint(&self) -> &str;

    fn latest_height(&self) -> BoxFuture<'_, Result<u64>>;

    fn fetch_block(&self, height: u64) -> BoxFuture<'_, Result<ChainBlock>>;
}

/// Opens clients for failover endpoints. Implementations should fail when the
/// endpoint does not answer, so a dead node is rotated out before use.
pub trait ChainClientFactory: Send + Sync {
    fn connect<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, Result<Arc<dyn ChainClient>>>;
}
