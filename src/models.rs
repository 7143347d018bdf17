//! Core data model: tracked wallets, transfers, and whale events
//!
//! `WhaleEvent` is the persisted record. Its id is a deterministic function of
//! (chain, tx hash, wallet), so re-processing the same transfer for the same
//! wallet side always upserts the same row. A transaction between two tracked
//! wallets produces two independent events referencing the same transfer.

use serde::{Deserialize, Serialize};

/// A curated address under monitoring, scoped to one chain.
///
/// Read-only to the core: wallets come from the registry snapshot taken at
/// indexer start. Uniqueness key is (chain, lowercase(address)).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub address: String,
    pub chain: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub source: Option<String>,
    /// Unix seconds when the wallet entered the registry.
    #[serde(default)]
    pub added_at: i64,
}

/// Immutable snapshot of one on-chain value movement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    pub hash: String,
    pub chain: String,
    pub from: String,
    pub to: String,
    /// Value in native units (raw amount divided by the chain's decimals).
    pub value: f64,
    pub value_usd: f64,
    /// Asset identifier; "native" for the chain's base asset.
    pub token: String,
    pub token_symbol: Option<String>,
    pub block_number: u64,
    /// Chain time of the containing block, unix seconds.
    pub timestamp: i64,
}

/// Direction of a whale event relative to the tracked wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TransferIn,
    TransferOut,
    /// Carried for serving-layer schema completeness; the polling indexer
    /// never emits swaps.
    Swap,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TransferIn => "transfer_in",
            EventType::TransferOut => "transfer_out",
            EventType::Swap => "swap",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "transfer_in" => Some(EventType::TransferIn),
            "transfer_out" => Some(EventType::TransferOut),
            "swap" => Some(EventType::Swap),
            _ => None,
        }
    }
}

/// Normalized, persisted record of one tracked wallet's side of a qualifying
/// transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhaleEvent {
    pub id: String,
    pub event_type: EventType,
    /// Lowercase tracked wallet address.
    pub wallet: String,
    pub wallet_label: Option<String>,
    pub chain: String,
    pub transfer: Transfer,
    pub significance: crate::classifier::Significance,
    /// Processing wall-clock time (unix seconds), not chain time.
    pub created_at: i64,
}

/// Deterministic event id.
///
/// Two calls with the same (chain, hash, wallet) always produce the same id;
/// the store upserts on it, which is what makes range re-scans after a crash
/// safe.
pub fn event_id(chain: &str, tx_hash: &str, wallet: &str) -> String {
    format!("{}:{}:{}", chain, tx_hash, wallet.to_lowercase())
}
