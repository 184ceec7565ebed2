//! Token supply and staking yield statistics service
//!
//! Polls the chain on a fixed interval for supply and staking-reward
//! counters, derives ROE and trailing APR figures, and serves the latest
//! snapshot over HTTP.

mod chain;
mod config;
mod constants;
mod refresh;
mod server;
mod staking;
mod store;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

use chain::{ChainReader, HttpChainReader};
use config::{Config, FileConfig};
use refresh::{PublishedState, RefreshScheduler};
use store::{SnapshotStore, SqliteSnapshotStore};

#[derive(Parser, Debug)]
#[command(name = "token-stats")]
#[command(about = "Token supply and staking yield statistics service")]
struct Args {
    /// Chain API URL (falls back to the URL environment variable)
    #[arg(short, long)]
    url: Option<String>,

    /// Port to listen on (falls back to the PORT environment variable)
    #[arg(short, long)]
    port: Option<u16>,

    /// Data directory for the snapshot history database
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Path to the config file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let file_config = FileConfig::load_if_present(&args.config)?;
    let url = args
        .url
        .or_else(|| std::env::var("URL").ok().filter(|v| !v.is_empty()));
    let port = args
        .port
        .or_else(|| std::env::var("PORT").ok().and_then(|v| v.parse().ok()));
    let config = Arc::new(Config::resolve(file_config, url, port, args.data_dir)?);

    std::fs::create_dir_all(&config.data_dir)?;
    let db_path = config.data_dir.join(constants::SNAPSHOT_DB_FILENAME);
    let store: Arc<dyn SnapshotStore> =
        Arc::new(SqliteSnapshotStore::open(&db_path, config.store_op_deadline).await?);
    let chain: Arc<dyn ChainReader> = Arc::new(HttpChainReader::new(config.chain_url.clone()));

    log::info!("chain API: {}", config.chain_url);
    log::info!("snapshot database: {}", db_path.display());

    let (publisher, published) = watch::channel(Arc::new(PublishedState::default()));
    let scheduler = RefreshScheduler::new(chain, store, config.clone(), publisher);

    // the watchdog outlives graceful shutdown on purpose: a wedged refresh
    // pipeline is only recoverable by a supervisor restart
    tokio::spawn(refresh::watchdog(
        scheduler.last_refreshed(),
        config.watchdog_poll,
        config.staleness_threshold,
        || std::process::exit(1),
    ));

    let (stop_tx, stop_rx) = watch::channel(false);
    {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run(stop_rx).await });
    }
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("shutdown signal received");
            let _ = stop_tx.send(true);
        }
    });

    let app = server::router(published);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    log::info!("listening on port {}", config.port);
    axum::serve(listener, app).await?;

    Ok(())
}
