use std::sync::Arc;
use std::time::Duration;

use whaleflow::{
    shutdown_channel, CoinGeckoFetcher, Config, EventStore, FileWalletRegistry, Indexer,
    JsonRpcChainClient, PriceOracle, WhaleError,
};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env();

    if let Err(e) = run(config).await {
        log::error!("❌ fatal: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), WhaleError> {
    // Unsupported chain with no endpoint fails here, before anything starts
    let endpoint = config.rpc_endpoint()?;

    log::info!(
        "🚀 whaleflow starting: chain={} endpoint={} db={}",
        config.chain,
        endpoint,
        config.db_path
    );

    let registry = Arc::new(FileWalletRegistry::new(&config.wallets_path));
    let chain_client = Arc::new(JsonRpcChainClient::new(endpoint)?);
    let oracle = PriceOracle::new(
        Arc::new(CoinGeckoFetcher::new()?),
        Duration::from_secs(config.price_ttl_secs),
    );
    let store = EventStore::open(&config.db_path)?;

    let mut indexer = Indexer::new(&config, registry, chain_client, oracle, store)?;
    indexer.start().await?;

    let (handle, stop_rx) = shutdown_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("🛑 shutdown signal received");
            handle.stop();
        }
    });

    indexer.run(stop_rx).await;

    Ok(())
}
