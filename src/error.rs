//! Error taxonomy for the indexing core
//!
//! Four failure classes with distinct handling:
//! - transient upstream failures are retried on the next poll tick
//! - validation failures are rejected synchronously, never retried
//! - configuration failures are fatal at startup
//! - storage failures keep the poll loop alive but block watermark advancement
//!
//! Queries for unknown wallets are NOT an error class: they return an empty
//! result set.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WhaleError {
    /// Chain RPC or price source failure. Retried automatically on the next
    /// poll tick; never fatal.
    #[error("transient upstream failure: {0}")]
    TransientUpstream(String),

    /// Malformed event handed to the store. Rejected synchronously.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unsupported chain, missing endpoint, unreadable wallet file. The
    /// indexer refuses to start.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// SQLite-level failure. Inside the poll loop this is contained like a
    /// transient failure, but the block watermark must not advance past the
    /// unpersisted event.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl From<reqwest::Error> for WhaleError {
    fn from(err: reqwest::Error) -> Self {
        WhaleError::TransientUpstream(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WhaleError>;
