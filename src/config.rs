//! Runtime configuration from environment variables
//!
//! Loaded once at startup with sensible defaults. Endpoint resolution for an
//! unsupported chain is a fatal configuration error: the indexer must refuse
//! to run against a missing endpoint.

use crate::classifier::Thresholds;
use crate::error::{Result, WhaleError};
use std::env;

/// Chains with built-in public RPC endpoints and their native asset symbol.
/// `WHALEFLOW_RPC_URL` and `WHALEFLOW_NATIVE_SYMBOL` together let the indexer
/// run against chains not listed here.
const SUPPORTED_CHAINS: &[(&str, &str, &str)] = &[
    ("ethereum", "https://eth.llamarpc.com", "ETH"),
    ("polygon", "https://polygon-rpc.com", "MATIC"),
    ("bsc", "https://binance.llamarpc.com", "BNB"),
];

#[derive(Debug, Clone)]
pub struct Config {
    /// Chain to index (one indexer instance per chain).
    pub chain: String,

    /// Explicit RPC endpoint override; takes precedence over the built-in map.
    pub rpc_url: Option<String>,

    /// Native asset symbol override; takes precedence over the built-in map.
    /// Required alongside `rpc_url` for chains without a built-in entry.
    pub native_symbol: Option<String>,

    /// Path to the SQLite event database.
    pub db_path: String,

    /// Path to the tracked-wallet registry file (JSON array of wallets).
    pub wallets_path: String,

    /// Seconds between poll iterations.
    pub poll_interval_secs: u64,

    /// Native price is refreshed every this many poll iterations, not per
    /// transaction, to bound oracle calls.
    pub price_refresh_polls: u64,

    /// Price cache TTL in seconds.
    pub price_ttl_secs: u64,

    /// Significance thresholds in USD.
    pub thresholds: Thresholds,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `WHALEFLOW_CHAIN` (default: ethereum)
    /// - `WHALEFLOW_RPC_URL` (default: built-in endpoint for the chain)
    /// - `WHALEFLOW_NATIVE_SYMBOL` (default: built-in symbol for the chain)
    /// - `WHALEFLOW_DB_PATH` (default: whaleflow.db)
    /// - `WHALEFLOW_WALLETS_PATH` (default: wallets.json)
    /// - `POLL_INTERVAL_SECS` (default: 15)
    /// - `PRICE_REFRESH_POLLS` (default: 4)
    /// - `PRICE_TTL_SECS` (default: 60)
    /// - `THRESHOLD_HIGH_USD` / `THRESHOLD_MEDIUM_USD` / `THRESHOLD_LOW_USD`
    ///   (defaults: 1,000,000 / 100,000 / 10,000)
    pub fn from_env() -> Self {
        let defaults = Thresholds::default();

        Self {
            chain: env::var("WHALEFLOW_CHAIN")
                .unwrap_or_else(|_| "ethereum".to_string())
                .to_lowercase(),

            rpc_url: env::var("WHALEFLOW_RPC_URL").ok(),

            native_symbol: env::var("WHALEFLOW_NATIVE_SYMBOL")
                .ok()
                .map(|s| s.to_uppercase()),

            db_path: env::var("WHALEFLOW_DB_PATH").unwrap_or_else(|_| "whaleflow.db".to_string()),

            wallets_path: env::var("WHALEFLOW_WALLETS_PATH")
                .unwrap_or_else(|_| "wallets.json".to_string()),

            poll_interval_secs: parse_env("POLL_INTERVAL_SECS", 15),

            price_refresh_polls: parse_env("PRICE_REFRESH_POLLS", 4),

            price_ttl_secs: parse_env("PRICE_TTL_SECS", 60),

            thresholds: Thresholds {
                high: parse_env("THRESHOLD_HIGH_USD", defaults.high),
                medium: parse_env("THRESHOLD_MEDIUM_USD", defaults.medium),
                low: parse_env("THRESHOLD_LOW_USD", defaults.low),
            },
        }
    }

    /// Resolve the RPC endpoint for the configured chain.
    ///
    /// # Returns
    /// * `Ok(url)` - explicit override, or the built-in endpoint
    /// * `Err(Configuration)` - unsupported chain with no override set
    pub fn rpc_endpoint(&self) -> Result<String> {
        if let Some(url) = &self.rpc_url {
            return Ok(url.clone());
        }

        SUPPORTED_CHAINS
            .iter()
            .find(|(chain, _, _)| *chain == self.chain)
            .map(|(_, url, _)| url.to_string())
            .ok_or_else(|| {
                WhaleError::Configuration(format!(
                    "no RPC endpoint for chain '{}' (set WHALEFLOW_RPC_URL)",
                    self.chain
                ))
            })
    }

    /// Native asset symbol for the configured chain, used for USD conversion.
    pub fn native_symbol(&self) -> Result<String> {
        if let Some(symbol) = &self.native_symbol {
            return Ok(symbol.clone());
        }

        SUPPORTED_CHAINS
            .iter()
            .find(|(chain, _, _)| *chain == self.chain)
            .map(|(_, _, symbol)| symbol.to_string())
            .ok_or_else(|| {
                WhaleError::Configuration(format!(
                    "unknown native asset for chain '{}' (set WHALEFLOW_NATIVE_SYMBOL)",
                    self.chain
                ))
            })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
