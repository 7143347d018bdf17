//! USD price oracle with TTL cache
//!
//! Lookup order per symbol: stablecoin short-circuit, fresh cache hit, then a
//! single batched fetch for everything stale or missing. Fetch failures never
//! surface to the caller: each requested symbol degrades to its last cached
//! price, or 0.0 if it has never been seen. The cache is only written on a
//! successful fetch, so a failure cannot poison it with a false-fresh zero.
//!
//! The cache is unbounded by design; the symbol universe is the static
//! mapping table below.

use crate::error::{Result, WhaleError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Symbols pinned to exactly 1.0 USD, bypassing cache and network.
const STABLECOINS: &[&str] = &["USDT", "USDC", "DAI", "BUSD", "TUSD", "USDP"];

/// Static symbol -> CoinGecko asset id table. Symbols outside this table
/// resolve to 0.0 with no network call.
fn coingecko_id(symbol: &str) -> Option<&'static str> {
    match symbol {
        "ETH" => Some("ethereum"),
        "WETH" => Some("weth"),
        "BTC" => Some("bitcoin"),
        "WBTC" => Some("wrapped-bitcoin"),
        "MATIC" => Some("matic-network"),
        "POL" => Some("polygon-ecosystem-token"),
        "BNB" => Some("binancecoin"),
        "SOL" => Some("solana"),
        "AVAX" => Some("avalanche-2"),
        "ARB" => Some("arbitrum"),
        "OP" => Some("optimism"),
        "LINK" => Some("chainlink"),
        "UNI" => Some("uniswap"),
        "AAVE" => Some("aave"),
        "LDO" => Some("lido-dao"),
        "STETH" => Some("staked-ether"),
        "SHIB" => Some("shiba-inu"),
        "PEPE" => Some("pepe"),
        _ => None,
    }
}

/// Network seam for price data, mockable in tests.
#[async_trait]
pub trait PriceFetcher: Send + Sync {
    /// Fetch USD prices for a deduplicated batch of external asset ids.
    ///
    /// # Returns
    /// * `Ok(map)` - asset id -> USD price; ids the source doesn't know may
    ///   be absent from the map
    /// * `Err(TransientUpstream)` - transport error or bad payload
    async fn fetch_usd_prices(&self, ids: &[String]) -> Result<HashMap<String, f64>>;
}

/// CoinGecko `/simple/price` implementation of [`PriceFetcher`].
pub struct CoinGeckoFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl CoinGeckoFetcher {
    pub fn new() -> Result<Self> {
        Self::with_base_url("https://api.coingecko.com/api/v3")
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| WhaleError::Configuration(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PriceFetcher for CoinGeckoFetcher {
    async fn fetch_usd_prices(&self, ids: &[String]) -> Result<HashMap<String, f64>> {
        let url = format!(
            "{}/simple/price?ids={}&vs_currencies=usd",
            self.base_url,
            ids.join(",")
        );

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(WhaleError::TransientUpstream(format!(
                "price API error: {}",
                response.status()
            )));
        }

        // {"ethereum": {"usd": 3000.0}, ...}
        let body: HashMap<String, HashMap<String, f64>> = response.json().await?;

        Ok(body
            .into_iter()
            .filter_map(|(id, currencies)| currencies.get("usd").map(|price| (id, *price)))
            .collect())
    }
}

struct PriceCacheEntry {
    price: f64,
    fetched_at: Instant,
}

/// TTL-cached USD price oracle.
///
/// Owned by the indexer and injected at construction; not a shared global.
pub struct PriceOracle {
    fetcher: std::sync::Arc<dyn PriceFetcher>,
    ttl: Duration,
    cache: Mutex<HashMap<String, PriceCacheEntry>>,
}

impl PriceOracle {
    pub fn new(fetcher: std::sync::Arc<dyn PriceFetcher>, ttl: Duration) -> Self {
        Self {
            fetcher,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// USD price for one symbol. Never fails; see [`PriceOracle::get_prices`].
    pub async fn get_price(&self, symbol: &str) -> f64 {
        let key = symbol.to_uppercase();
        self.get_prices(&[symbol])
            .await
            .get(&key)
            .copied()
            .unwrap_or(0.0)
    }

    /// USD prices for a set of symbols.
    ///
    /// Stale or missing symbols are mapped to external asset ids,
    /// deduplicated, and fetched in one batched request. On fetch failure the
    /// result degrades per symbol to the last cached price or 0.0, and the
    /// cache is left unmodified.
    pub async fn get_prices(&self, symbols: &[&str]) -> HashMap<String, f64> {
        let mut resolved: HashMap<String, f64> = HashMap::new();
        // asset id -> symbols waiting on it (several symbols may share an id)
        let mut pending: HashMap<String, Vec<String>> = HashMap::new();

        {
            let cache = self.cache.lock().unwrap();
            for raw in symbols {
                let symbol = raw.to_uppercase();
                if resolved.contains_key(&symbol) || pending.values().flatten().any(|s| *s == symbol)
                {
                    continue;
                }

                if STABLECOINS.contains(&symbol.as_str()) {
                    resolved.insert(symbol, 1.0);
                    continue;
                }

                if let Some(entry) = cache.get(&symbol) {
                    if entry.fetched_at.elapsed() < self.ttl {
                        resolved.insert(symbol, entry.price);
                        continue;
                    }
                }

                match coingecko_id(&symbol) {
                    Some(id) => pending.entry(id.to_string()).or_default().push(symbol),
                    None => {
                        resolved.insert(symbol, 0.0);
                    }
                }
            }
        }

        if pending.is_empty() {
            return resolved;
        }

        let ids: Vec<String> = pending.keys().cloned().collect();

        match self.fetcher.fetch_usd_prices(&ids).await {
            Ok(prices) => {
                let mut cache = self.cache.lock().unwrap();
                for (id, waiting) in pending {
                    match prices.get(&id) {
                        Some(&price) => {
                            for symbol in waiting {
                                cache.insert(
                                    symbol.clone(),
                                    PriceCacheEntry {
                                        price,
                                        fetched_at: Instant::now(),
                                    },
                                );
                                resolved.insert(symbol, price);
                            }
                        }
                        // Id absent from an otherwise good response: treat
                        // like a per-symbol miss, no cache write.
                        None => {
                            for symbol in waiting {
                                let fallback = cache.get(&symbol).map(|e| e.price).unwrap_or(0.0);
                                resolved.insert(symbol, fallback);
                            }
                        }
                    }
                }
            }
            Err(e) => {
                log::warn!("price fetch failed, serving cached values: {}", e);
                let cache = self.cache.lock().unwrap();
                for waiting in pending.into_values() {
                    for symbol in waiting {
                        let fallback = cache.get(&symbol).map(|e| e.price).unwrap_or(0.0);
                        resolved.insert(symbol, fallback);
                    }
                }
            }
        }

        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Scripted fetcher: fixed id -> price map, togglable failure, call count.
    struct MockFetcher {
        prices: Mutex<HashMap<String, f64>>,
        fail: AtomicBool,
        calls: AtomicUsize,
        last_batch_len: AtomicUsize,
    }

    impl MockFetcher {
        fn new(prices: &[(&str, f64)]) -> Self {
            Self {
                prices: Mutex::new(
                    prices
                        .iter()
                        .map(|(id, p)| (id.to_string(), *p))
                        .collect(),
                ),
                fail: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
                last_batch_len: AtomicUsize::new(0),
            }
        }

        fn set_fail(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PriceFetcher for MockFetcher {
        async fn fetch_usd_prices(&self, ids: &[String]) -> Result<HashMap<String, f64>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.last_batch_len.store(ids.len(), Ordering::SeqCst);

            if self.fail.load(Ordering::SeqCst) {
                return Err(WhaleError::TransientUpstream("forced failure".to_string()));
            }

            let prices = self.prices.lock().unwrap();
            Ok(ids
                .iter()
                .filter_map(|id| prices.get(id).map(|p| (id.clone(), *p)))
                .collect())
        }
    }

    fn oracle_with(fetcher: Arc<MockFetcher>, ttl: Duration) -> PriceOracle {
        PriceOracle::new(fetcher, ttl)
    }

    #[tokio::test]
    async fn test_stablecoin_short_circuits_network() {
        let fetcher = Arc::new(MockFetcher::new(&[]));
        let oracle = oracle_with(fetcher.clone(), Duration::from_secs(60));

        assert_eq!(oracle.get_price("USDC").await, 1.0);
        assert_eq!(oracle.get_price("usdt").await, 1.0); // uppercased for lookup
        assert_eq!(fetcher.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unmapped_symbol_resolves_zero_without_fetch() {
        let fetcher = Arc::new(MockFetcher::new(&[]));
        let oracle = oracle_with(fetcher.clone(), Duration::from_secs(60));

        assert_eq!(oracle.get_price("NOTACOIN").await, 0.0);
        assert_eq!(fetcher.call_count(), 0);
    }

    #[tokio::test]
    async fn test_fresh_cache_hit_skips_fetch() {
        let fetcher = Arc::new(MockFetcher::new(&[("ethereum", 3000.0)]));
        let oracle = oracle_with(fetcher.clone(), Duration::from_secs(60));

        assert_eq!(oracle.get_price("ETH").await, 3000.0);
        assert_eq!(oracle.get_price("ETH").await, 3000.0);
        assert_eq!(fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_batch_deduplicates_symbols() {
        let fetcher = Arc::new(MockFetcher::new(&[("ethereum", 3000.0), ("solana", 150.0)]));
        let oracle = oracle_with(fetcher.clone(), Duration::from_secs(60));

        let prices = oracle.get_prices(&["ETH", "eth", "SOL", "USDC"]).await;

        assert_eq!(prices.get("ETH"), Some(&3000.0));
        assert_eq!(prices.get("SOL"), Some(&150.0));
        assert_eq!(prices.get("USDC"), Some(&1.0));
        assert_eq!(fetcher.call_count(), 1);
        assert_eq!(fetcher.last_batch_len.load(Ordering::SeqCst), 2); // ETH + SOL only
    }

    #[tokio::test]
    async fn test_failure_returns_cached_then_zero() {
        // Zero TTL: every call re-fetches, so the cache is always "stale"
        let fetcher = Arc::new(MockFetcher::new(&[("ethereum", 3000.0)]));
        let oracle = oracle_with(fetcher.clone(), Duration::ZERO);

        // Seed the cache with one successful fetch
        assert_eq!(oracle.get_price("ETH").await, 3000.0);

        fetcher.set_fail(true);
        let prices = oracle.get_prices(&["ETH", "SOL"]).await;

        // Previously seen symbol falls back to its cached price, never-seen
        // symbol resolves to zero, and nothing panics or errors
        assert_eq!(prices.get("ETH"), Some(&3000.0));
        assert_eq!(prices.get("SOL"), Some(&0.0));

        // Cache was not poisoned: recovery serves the fresh price again
        fetcher.set_fail(false);
        fetcher
            .prices
            .lock()
            .unwrap()
            .insert("ethereum".to_string(), 3100.0);
        assert_eq!(oracle.get_price("ETH").await, 3100.0);
    }

    #[tokio::test]
    async fn test_missing_id_in_response_does_not_cache_zero() {
        // Fetcher responds but knows nothing about solana
        let fetcher = Arc::new(MockFetcher::new(&[("ethereum", 3000.0)]));
        let oracle = oracle_with(fetcher.clone(), Duration::ZERO);

        let prices = oracle.get_prices(&["ETH", "SOL"]).await;
        assert_eq!(prices.get("ETH"), Some(&3000.0));
        assert_eq!(prices.get("SOL"), Some(&0.0));

        // SOL becomes known later and must come through, not a cached zero
        fetcher
            .prices
            .lock()
            .unwrap()
            .insert("solana".to_string(), 150.0);
        assert_eq!(oracle.get_price("SOL").await, 150.0);
    }
}
