//! Block-polling indexer
//!
//! One sequential worker per instance: fetch head, walk each new height in
//! order, filter every transaction against the tracked-wallet snapshot,
//! convert to USD, classify, persist. The block watermark advances only after
//! an entire range succeeds, so a crash or failed insert mid-range re-scans
//! the partial range on the next tick; that re-scan is safe because event ids
//! are deterministic and the store upserts.
//!
//! Lifecycle: Stopped -> start() -> Running (poll loop) -> stop() -> Stopped.
//! There is no paused state. Stop is cooperative and observed between
//! iterations; an in-flight fetch is never aborted.

use crate::chain::{ChainClient, ChainTransaction};
use crate::classifier::{classify, Thresholds};
use crate::config::Config;
use crate::error::Result;
use crate::models::{event_id, EventType, Transfer, Wallet, WhaleEvent};
use crate::oracle::PriceOracle;
use crate::registry::WalletRegistry;
use crate::store::EventStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Cooperative stop signal for a running indexer.
///
/// `stop()` flips the flag and returns immediately; the poll loop observes it
/// at its next iteration boundary and guarantees no further block fetch after
/// that.
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }
}

pub fn shutdown_channel() -> (ShutdownHandle, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, rx)
}

/// Polls one chain for transfers touching tracked wallets and writes
/// normalized whale events to the store.
///
/// All collaborators are injected at construction; the indexer owns its
/// oracle and store handle and holds no process-wide state.
pub struct Indexer {
    chain: String,
    native_symbol: String,
    poll_interval: Duration,
    price_refresh_polls: u64,
    thresholds: Thresholds,

    registry: Arc<dyn WalletRegistry>,
    chain_client: Arc<dyn ChainClient>,
    oracle: PriceOracle,
    store: EventStore,

    /// Snapshot of tracked wallets, lowercase address -> wallet. Taken once
    /// at start; registry additions after that are not picked up mid-run.
    wallets: HashMap<String, Wallet>,
    /// Highest fully-processed block. Blocks at or before this height are
    /// never scanned.
    last_block: u64,
    /// Cached native-asset USD price, refreshed on a multi-poll cadence.
    native_price: f64,
    polls_since_refresh: u64,
}

impl Indexer {
    pub fn new(
        config: &Config,
        registry: Arc<dyn WalletRegistry>,
        chain_client: Arc<dyn ChainClient>,
        oracle: PriceOracle,
        store: EventStore,
    ) -> Result<Self> {
        Ok(Self {
            chain: config.chain.clone(),
            native_symbol: config.native_symbol()?,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            price_refresh_polls: config.price_refresh_polls.max(1),
            thresholds: config.thresholds.clone(),
            registry,
            chain_client,
            oracle,
            store,
            wallets: HashMap::new(),
            last_block: 0,
            native_price: 0.0,
            polls_since_refresh: 0,
        })
    }

    /// Snapshot the tracked-wallet set and record the current chain head.
    ///
    /// Blocks at or before the recorded head are never scanned. Fails with a
    /// configuration error if the registry is unreadable, or a transient
    /// error if the chain head cannot be fetched.
    pub async fn start(&mut self) -> Result<()> {
        let wallets = self.registry.wallets_for_chain(&self.chain)?;
        self.wallets = wallets
            .into_iter()
            .map(|w| (w.address.to_lowercase(), w))
            .collect();

        if self.wallets.is_empty() {
            log::warn!("no tracked wallets for chain {}, nothing will match", self.chain);
        }

        self.refresh_native_price().await;
        self.polls_since_refresh = 0;

        self.last_block = self.chain_client.current_block_height().await?;

        log::info!(
            "🐋 indexer started: chain={} wallets={} head={} {}=${:.2}",
            self.chain,
            self.wallets.len(),
            self.last_block,
            self.native_symbol,
            self.native_price
        );

        Ok(())
    }

    /// Run the poll loop until the shutdown handle fires, then release the
    /// store handle.
    pub async fn run(mut self, mut stop_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::info!("⏰ polling every {}s", self.poll_interval.as_secs());

        loop {
            tokio::select! {
                biased;

                _ = stop_rx.changed() => {
                    break;
                }

                _ = ticker.tick() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                    // Per-iteration errors are contained here: the loop
                    // continues at the next tick with last_block unchanged
                    if let Err(e) = self.poll_once().await {
                        log::warn!(
                            "⚠️  poll iteration failed (resuming after block {}): {}",
                            self.last_block,
                            e
                        );
                    }
                }
            }
        }

        let last = self.last_block;
        self.store.close();
        log::info!("✅ indexer stopped at block {}", last);
    }

    /// One poll iteration: refresh the native price on cadence, fetch the
    /// head, and process every new height in order.
    ///
    /// `last_block` advances only after the entire range succeeds.
    pub async fn poll_once(&mut self) -> Result<()> {
        if self.polls_since_refresh >= self.price_refresh_polls {
            self.refresh_native_price().await;
            self.polls_since_refresh = 0;
        }
        self.polls_since_refresh += 1;

        let head = self.chain_client.current_block_height().await?;

        if head <= self.last_block {
            log::debug!("no new blocks (head={}, last={})", head, self.last_block);
            return Ok(());
        }

        log::info!(
            "📦 scanning blocks {}..={} on {}",
            self.last_block + 1,
            head,
            self.chain
        );

        for height in self.last_block + 1..=head {
            let block = self.chain_client.block_with_transactions(height).await?;
            for tx in &block.transactions {
                self.process_transaction(tx, block.timestamp)?;
            }
        }

        self.last_block = head;
        Ok(())
    }

    /// Highest fully-processed block height.
    pub fn last_block(&self) -> u64 {
        self.last_block
    }

    /// Filter one transaction against the wallet snapshot and persist one
    /// event per tracked side.
    ///
    /// A failed insert propagates so the caller does not advance `last_block`
    /// past the block holding the unpersisted event.
    fn process_transaction(&self, tx: &ChainTransaction, block_timestamp: i64) -> Result<()> {
        let from = tx.from.to_lowercase();
        let to = tx.to.as_deref().map(str::to_lowercase);

        let from_wallet = self.wallets.get(&from);
        let to_wallet = to.as_ref().and_then(|t| self.wallets.get(t));

        // Fast path: the overwhelming majority of transactions touch no
        // tracked wallet
        if from_wallet.is_none() && to_wallet.is_none() {
            return Ok(());
        }

        let value_usd = tx.value * self.native_price;
        if value_usd < self.thresholds.low {
            log::debug!(
                "tracked-wallet tx {} below minimum (${:.2})",
                tx.hash,
                value_usd
            );
            return Ok(());
        }

        let significance = classify(value_usd, &self.thresholds);

        let transfer = Transfer {
            hash: tx.hash.clone(),
            chain: self.chain.clone(),
            from: from.clone(),
            to: to.clone().unwrap_or_default(),
            value: tx.value,
            value_usd,
            token: "native".to_string(),
            token_symbol: Some(self.native_symbol.clone()),
            block_number: tx.block_number,
            timestamp: block_timestamp,
        };

        let created_at = chrono::Utc::now().timestamp();

        // A transaction between two tracked wallets yields two independent
        // events referencing the same transfer
        let sides = [
            (from_wallet, EventType::TransferOut),
            (to_wallet, EventType::TransferIn),
        ];

        for (wallet, event_type) in sides {
            let Some(wallet) = wallet else { continue };
            let address = wallet.address.to_lowercase();

            let event = WhaleEvent {
                id: event_id(&self.chain, &tx.hash, &address),
                event_type,
                wallet: address,
                wallet_label: wallet.label.clone(),
                chain: self.chain.clone(),
                transfer: transfer.clone(),
                significance,
                created_at,
            };

            self.store.insert(&event)?;

            log::info!(
                "🐋 {} {:?} ${:.0} {} wallet={} tx={}",
                significance.as_str(),
                event_type,
                value_usd,
                self.native_symbol,
                event.wallet,
                tx.hash
            );
        }

        Ok(())
    }

    async fn refresh_native_price(&mut self) {
        let price = self.oracle.get_price(&self.native_symbol).await;
        if price == 0.0 {
            // Conversions degrade to $0 and nothing clears the admission
            // bar until the next successful refresh
            log::warn!("{} price unavailable, events suppressed", self.native_symbol);
        }
        self.native_price = price;
    }
}
