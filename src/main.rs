use std::env;
use std::sync::Arc;

use clap::Parser;
use log::{info, warn};

use large_tx_watcher::blockchain::{BlockConsumer, ChainPoller, RpcClient};
use large_tx_watcher::config::AppConfig;
use large_tx_watcher::detector::{DetectorPool, LargeTransferDetector};
use large_tx_watcher::notifier::{LogNotifier, Notifier, SlackNotifier};
use large_tx_watcher::store::{BlockCursorStore, OperationStore, SqliteStore};
use large_tx_watcher::WatcherError;

#[derive(Parser)]
#[command(name = "watcher")]
#[command(about = "Watches an ERC-20 token for large transfers and reports them")]
#[command(version = "0.1.0")]
struct Args {
    /// Configuration file path (overrides the CONFIG_FILE environment variable)
    #[arg(long)]
    config: Option<String>,

    /// Start from this block instead of the persisted cursor (0 = use cursor)
    #[arg(long, default_value = "0")]
    resume_from: u64,
}

#[tokio::main]
async fn main() -> Result<(), WatcherError> {
    let args = Args::parse();
    if let Some(path) = &args.config {
        env::set_var("CONFIG_FILE", path);
    }

    let config = AppConfig::load()?;
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.logging.level),
    )
    .init();

    info!(
        "Starting large transfer watcher for {} (threshold {} {})",
        config.detector.token_address, config.detector.threshold, config.detector.token_symbol
    );

    let store = Arc::new(SqliteStore::new(
        &config.store.path,
        config.store.operation_retention_seconds,
    )?);
    if args.resume_from > 0 {
        warn!("Overriding the block cursor to {}", args.resume_from);
        store.set_latest_block(args.resume_from)?;
    }

    let client = Arc::new(RpcClient::new(
        config.rpc.endpoint.clone(),
        config.rpc.timeout_seconds,
    ));

    let notifier: Arc<dyn Notifier> = if config.slack.oauth_token.is_empty() {
        info!("Slack is not configured, logging notifications instead");
        Arc::new(LogNotifier)
    } else {
        Arc::new(SlackNotifier::new(config.slack.clone()))
    };

    let detector = LargeTransferDetector::new(
        config.detector.clone(),
        Arc::clone(&client),
        notifier,
    )?;

    let mut pool = DetectorPool::new(Arc::clone(&store) as Arc<dyn OperationStore>);
    pool.register(Box::new(detector));

    let poller = ChainPoller::new(client, config.poller.clone());
    let consumer = Arc::new(BlockConsumer::new(
        poller,
        pool,
        Arc::clone(&store) as Arc<dyn BlockCursorStore>,
        config.consumer.block_backoff_seconds,
    ));

    tokio::spawn({
        let consumer = Arc::clone(&consumer);
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal");
                consumer.shutdown();
            }
        }
    });

    consumer.start().await?;
    Ok(())
}
