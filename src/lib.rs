//! # whaleflow
//!
//! Watches a curated set of blockchain addresses, detects value transfers
//! above a significance threshold, normalizes them into persisted events, and
//! serves them for querying.
//!
//! Component flow:
//!
//! ```text
//! Indexer polls chain head
//!     -> membership filter against the tracked-wallet snapshot
//!     -> USD conversion (PriceOracle, TTL cache)
//!     -> significance classification
//!     -> idempotent upsert into EventStore (SQLite)
//! ```
//!
//! The serving layer reads exclusively through [`store::EventStore`]'s query
//! interfaces; wallet curation and the API gateway are external
//! collaborators.

pub mod chain;
pub mod classifier;
pub mod config;
pub mod error;
pub mod indexer;
pub mod models;
pub mod oracle;
pub mod registry;
pub mod store;

pub use chain::{Block, ChainClient, ChainTransaction, JsonRpcChainClient};
pub use classifier::{classify, Significance, Thresholds};
pub use config::Config;
pub use error::{Result, WhaleError};
pub use indexer::{shutdown_channel, Indexer, ShutdownHandle};
pub use models::{event_id, EventType, Transfer, Wallet, WhaleEvent};
pub use oracle::{CoinGeckoFetcher, PriceFetcher, PriceOracle};
pub use registry::{FileWalletRegistry, StaticWalletRegistry, WalletRegistry};
pub use store::{EventFilter, EventStats, EventStore};
