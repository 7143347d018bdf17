//! Chain access: block height polling and full-transaction block fetch
//!
//! `ChainClient` is the network seam the indexer polls through; the shipped
//! implementation speaks EVM JSON-RPC (`eth_blockNumber`,
//! `eth_getBlockByNumber` with full transaction objects) over HTTP. All
//! failures map to `TransientUpstream`: the poll loop retries on the next
//! tick.

use crate::error::{Result, WhaleError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// One value-transfer transaction as seen on chain.
#[derive(Debug, Clone)]
pub struct ChainTransaction {
    pub hash: String,
    pub from: String,
    /// None for contract-creation transactions.
    pub to: Option<String>,
    /// Value in native units (wei already divided out).
    pub value: f64,
    pub block_number: u64,
}

/// A block with its full transaction list.
#[derive(Debug, Clone)]
pub struct Block {
    pub number: u64,
    /// Chain time, unix seconds.
    pub timestamp: i64,
    pub transactions: Vec<ChainTransaction>,
}

/// Read port onto the chain, mockable in tests.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn current_block_height(&self) -> Result<u64>;

    async fn block_with_transactions(&self, height: u64) -> Result<Block>;
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<serde_json::Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcBlock {
    timestamp: String,
    transactions: Vec<RpcTransaction>,
}

#[derive(Debug, Deserialize)]
struct RpcTransaction {
    hash: String,
    from: String,
    to: Option<String>,
    value: String,
}

/// EVM JSON-RPC implementation of [`ChainClient`].
pub struct JsonRpcChainClient {
    client: reqwest::Client,
    endpoint: String,
}

impl JsonRpcChainClient {
    pub fn new(endpoint: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| WhaleError::Configuration(format!("http client: {}", e)))?;

        Ok(Self { client, endpoint })
    }

    async fn rpc(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self.client.post(&self.endpoint).json(&payload).send().await?;

        if !response.status().is_success() {
            return Err(WhaleError::TransientUpstream(format!(
                "RPC HTTP error: {}",
                response.status()
            )));
        }

        let body: RpcResponse = response.json().await?;

        if let Some(err) = body.error {
            return Err(WhaleError::TransientUpstream(format!(
                "RPC error {}: {}",
                err.code, err.message
            )));
        }

        body.result
            .ok_or_else(|| WhaleError::TransientUpstream("RPC response missing result".to_string()))
    }
}

#[async_trait]
impl ChainClient for JsonRpcChainClient {
    async fn current_block_height(&self) -> Result<u64> {
        let result = self.rpc("eth_blockNumber", json!([])).await?;
        let hex = result
            .as_str()
            .ok_or_else(|| WhaleError::TransientUpstream("eth_blockNumber: non-string result".to_string()))?;

        parse_hex_u64(hex)
    }

    async fn block_with_transactions(&self, height: u64) -> Result<Block> {
        let result = self
            .rpc("eth_getBlockByNumber", json!([format!("{:#x}", height), true]))
            .await?;

        if result.is_null() {
            // The node's head can lag a load balancer peer that answered
            // eth_blockNumber; retried next tick
            return Err(WhaleError::TransientUpstream(format!(
                "block {} not available yet",
                height
            )));
        }

        let block: RpcBlock = serde_json::from_value(result)
            .map_err(|e| WhaleError::TransientUpstream(format!("malformed block {}: {}", height, e)))?;

        let timestamp = parse_hex_u64(&block.timestamp)? as i64;

        let transactions = block
            .transactions
            .into_iter()
            .map(|tx| {
                Ok(ChainTransaction {
                    value: wei_to_native(&tx.value)?,
                    hash: tx.hash,
                    from: tx.from,
                    to: tx.to,
                    block_number: height,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Block {
            number: height,
            timestamp,
            transactions,
        })
    }
}

/// Parse a 0x-prefixed hex quantity into a u64.
fn parse_hex_u64(hex: &str) -> Result<u64> {
    u64::from_str_radix(hex.trim_start_matches("0x"), 16)
        .map_err(|e| WhaleError::TransientUpstream(format!("bad hex quantity {:?}: {}", hex, e)))
}

/// Convert a 0x-prefixed wei quantity into native units (1e18 wei per unit).
fn wei_to_native(hex: &str) -> Result<f64> {
    let wei = u128::from_str_radix(hex.trim_start_matches("0x"), 16)
        .map_err(|e| WhaleError::TransientUpstream(format!("bad wei quantity {:?}: {}", hex, e)))?;

    Ok(wei as f64 / 1e18)
}
