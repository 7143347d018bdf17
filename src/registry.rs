//! Tracked-wallet registry read port
//!
//! Wallet curation lives outside the core; the indexer only needs one
//! synchronous read of all wallets for its chain, taken once at start. The
//! shipped implementation reads a JSON array from disk. No module-level
//! state: the registry is injected into the indexer at construction.

use crate::error::{Result, WhaleError};
use crate::models::Wallet;
use std::path::{Path, PathBuf};

pub trait WalletRegistry: Send + Sync {
    /// All wallets curated for `chain` (case-insensitive match).
    fn wallets_for_chain(&self, chain: &str) -> Result<Vec<Wallet>>;
}

/// JSON-file registry: a flat array of wallet objects.
pub struct FileWalletRegistry {
    path: PathBuf,
}

impl FileWalletRegistry {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl WalletRegistry for FileWalletRegistry {
    fn wallets_for_chain(&self, chain: &str) -> Result<Vec<Wallet>> {
        let raw = std::fs::read_to_string(&self.path).map_err(|e| {
            WhaleError::Configuration(format!(
                "cannot read wallet registry {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let wallets: Vec<Wallet> = serde_json::from_str(&raw).map_err(|e| {
            WhaleError::Configuration(format!(
                "malformed wallet registry {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let chain = chain.to_lowercase();
        Ok(wallets
            .into_iter()
            .filter(|w| w.chain.to_lowercase() == chain)
            .collect())
    }
}

/// Fixed in-memory registry, for embedding and tests.
pub struct StaticWalletRegistry {
    wallets: Vec<Wallet>,
}

impl StaticWalletRegistry {
    pub fn new(wallets: Vec<Wallet>) -> Self {
        Self { wallets }
    }
}

impl WalletRegistry for StaticWalletRegistry {
    fn wallets_for_chain(&self, chain: &str) -> Result<Vec<Wallet>> {
        let chain = chain.to_lowercase();
        Ok(self
            .wallets
            .iter()
            .filter(|w| w.chain.to_lowercase() == chain)
            .cloned()
            .collect())
    }
}
