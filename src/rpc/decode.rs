//! Tendermint JSON-RPC response shapes and their conversion into
//! [`ChainBlock`]s.

use crate::chain::{ChainBlock, ChainTx, Coin, DecodedTx, EventAttribute, TxBody, TxEvent};
use crate::model::uint_range::deserialize_uint;
use crate::rpc::options::EventEncoding;
use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    pub sync_info: SyncInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncInfo {
    #[serde(deserialize_with = "deserialize_uint")]
    pub latest_block_height: u64,
    #[serde(default)]
    pub catching_up: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockResponse {
    pub block: RawBlock,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawBlock {
    pub header: RawHeader,
    #[serde(default)]
    pub data: RawBlockData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawHeader {
    #[serde(deserialize_with = "deserialize_uint")]
    pub height: u64,
    pub time: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBlockData {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub txs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockResultsResponse {
    #[serde(deserialize_with = "deserialize_uint")]
    pub height: u64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub txs_results: Vec<RawTxResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTxResult {
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub log: String,
    #[serde(default, deserialize_with = "deserialize_uint")]
    pub gas_wanted: u64,
    #[serde(default, deserialize_with = "deserialize_uint")]
    pub gas_used: u64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub events: Vec<TxEvent>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Turns raw transaction bytes into messages and fee data.
pub trait TxDecoder: Send + Sync {
    fn decode(&self, raw: &[u8]) -> Result<DecodedTx>;
}

/// Decodes transactions that are JSON documents in the amino-JSON layout
/// (`body.messages`, `auth_info.fee`), as produced by JSON-signing clients
/// and test chains.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTxDecoder;

#[derive(Deserialize)]
struct JsonTx {
    body: JsonTxBody,
    #[serde(default)]
    auth_info: Option<JsonAuthInfo>,
}

#[derive(Deserialize)]
struct JsonTxBody {
    #[serde(default)]
    messages: Vec<Value>,
}

#[derive(Deserialize)]
struct JsonAuthInfo {
    #[serde(default)]
    fee: Option<JsonFee>,
}

#[derive(Deserialize)]
struct JsonFee {
    #[serde(default)]
    amount: Vec<Coin>,
    #[serde(default, deserialize_with = "deserialize_uint")]
    gas_limit: u64,
}

impl TxDecoder for JsonTxDecoder {
    fn decode(&self, raw: &[u8]) -> Result<DecodedTx> {
        let tx: JsonTx = serde_json::from_slice(raw).context("transaction is not valid JSON")?;
        let fee = tx.auth_info.and_then(|info| info.fee);
        let (fee, gas_limit) = match fee {
            Some(fee) => (fee.amount, fee.gas_limit),
            None => (Vec::new(), 0),
        };
        Ok(DecodedTx {
            messages: tx.body.messages,
            fee,
            gas_limit,
        })
    }
}

/// Uppercase hex SHA-256 of the raw transaction bytes, the hash Tendermint
/// reports for a transaction.
pub fn tx_hash(raw: &[u8]) -> String {
    hex::encode_upper(Sha256::digest(raw))
}

/// RFC 3339 block time to unix milliseconds.
pub fn parse_block_time(value: &str) -> Result<u64> {
    let parsed = OffsetDateTime::parse(value, &Rfc3339)
        .with_context(|| format!("invalid block time {value:?}"))?;
    let millis = parsed.unix_timestamp_nanos() / 1_000_000;
    u64::try_from(millis).with_context(|| format!("block time {value:?} predates the unix epoch"))
}

/// Joins a block with its execution results. Transactions that cannot be
/// decoded stay in the block as [`TxBody::Malformed`] so the processor can
/// skip them individually.
pub fn assemble_block(
    block: BlockResponse,
    results: BlockResultsResponse,
    decoder: &dyn TxDecoder,
    encoding: EventEncoding,
) -> Result<ChainBlock> {
    let height = block.block.header.height;
    if results.height != height {
        bail!(
            "block_results height {} does not match block height {height}",
            results.height
        );
    }
    let txs = block.block.data.txs;
    if txs.len() != results.txs_results.len() {
        bail!(
            "block {height} has {} txs but {} results",
            txs.len(),
            results.txs_results.len()
        );
    }

    let timestamp = parse_block_time(&block.block.header.time)?;
    let mut chain_txs = Vec::with_capacity(txs.len());
    for (index, (encoded, result)) in txs.iter().zip(results.txs_results).enumerate() {
        let (hash, body) = match STANDARD.decode(encoded) {
            Ok(raw) => {
                let body = match decoder.decode(&raw) {
                    Ok(decoded) => TxBody::Decoded(decoded),
                    Err(err) => TxBody::Malformed(format!("{err:#}")),
                };
                (tx_hash(&raw), body)
            }
            Err(err) => (
                tx_hash(encoded.as_bytes()),
                TxBody::Malformed(format!("transaction is not valid base64: {err}")),
            ),
        };
        chain_txs.push(ChainTx {
            index: index as u64,
            hash,
            code: result.code,
            log: result.log,
            gas_wanted: result.gas_wanted,
            gas_used: result.gas_used,
            body,
            events: decode_events(result.events, encoding),
        });
    }

    Ok(ChainBlock {
        height,
        timestamp,
        txs: chain_txs,
    })
}

fn decode_events(events: Vec<TxEvent>, encoding: EventEncoding) -> Vec<TxEvent> {
    match encoding {
        EventEncoding::Plain => events,
        EventEncoding::Base64 => events
            .into_iter()
            .map(|event| TxEvent {
                kind: event.kind,
                attributes: event
                    .attributes
                    .into_iter()
                    .map(|attribute| EventAttribute {
                        key: decode_base64_text(attribute.key),
                        value: decode_base64_text(attribute.value),
                    })
                    .collect(),
            })
            .collect(),
    }
}

/// Values that are not valid base64 text are kept as sent.
fn decode_base64_text(value: String) -> String {
    STANDARD
        .decode(&value)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or(value)
}
