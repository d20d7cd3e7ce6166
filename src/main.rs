//! offcache - an offline-capable caching proxy
//!
//! Sits in front of an `http://` origin, serves every request network-first,
//! and falls back to the last cached copy (or an offline page) when the
//! origin is unreachable.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use offcache::store::{self, DiskStorage, Storage};
use offcache::{Config, HttpNetwork, OfflineWorker, Server, Worker};

/// offcache - network-first HTTP cache with offline fallback.
#[derive(Parser, Debug)]
#[command(name = "offcache", author, version, about)]
struct Cli {
    /// JSON config file. Without one, built-in defaults are used.
    #[arg(long, short, global = true, env = "OFFCACHE_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address to listen on (overrides `listen`).
    #[arg(long, global = true, env = "OFFCACHE_LISTEN", value_name = "ADDR")]
    listen: Option<String>,

    /// Upstream origin, e.g. http://127.0.0.1:8000 (overrides `origin`).
    #[arg(long, global = true, env = "OFFCACHE_ORIGIN", value_name = "URL")]
    origin: Option<String>,

    /// Directory holding the on-disk stores (overrides `storage-dir`).
    #[arg(long, global = true, env = "OFFCACHE_STORAGE_DIR", value_name = "DIR")]
    storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Preload the cache, then serve requests (default).
    Serve,
    /// Preload the cache and exit; fails if the preload fails.
    Install,
    /// Delete every store except the configured one.
    Prune,
}

impl Cli {
    fn config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(listen) = &self.listen {
            config.listen = listen.clone();
        }
        if let Some(origin) = &self.origin {
            config.origin = origin.clone();
        }
        if let Some(dir) = &self.storage_dir {
            config.storage_dir = dir.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("offcache=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config()?;
    let storage = DiskStorage::new(&config.storage_dir);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config, &storage).await,
        Command::Install => {
            let worker = worker(&config, &storage).await?;
            let stored = worker.on_install().await.context("preload failed")?;
            info!(stored, store = %config.store_name, "install complete");
            Ok(())
        }
        Command::Prune => {
            let removed = store::prune(&storage, &config.store_name)
                .await
                .with_context(|| format!("pruning {}", storage.root().display()))?;
            info!(removed = removed.len(), kept = %config.store_name, "prune complete");
            Ok(())
        }
    }
}

async fn worker(
    config: &Config,
    storage: &DiskStorage,
) -> Result<OfflineWorker<HttpNetwork, store::DiskStore>> {
    let network = Arc::new(HttpNetwork::new(&config.origin)?);
    let store = storage
        .open(&config.store_name)
        .await
        .with_context(|| format!("opening store {}", config.store_name))?;
    Ok(OfflineWorker::from_config(config, network, store))
}

async fn serve(config: &Config, storage: &DiskStorage) -> Result<()> {
    let worker = Arc::new(worker(config, storage).await?);

    // A failed preload leaves the cache cold; the proxy still serves.
    match worker.on_install().await {
        Ok(stored) => info!(stored, store = %config.store_name, "cache installed"),
        Err(e) => {
            warn!(error = %e, "preload failed, serving with a partial cache");
            for failure in e.failures() {
                warn!(%failure, "preload failure");
            }
        }
    }

    let server = Server::bind(&config.listen).await?;
    info!(origin = %config.origin, store = %config.store_name, "proxying");
    server
        .serve(Arc::clone(&worker), async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    worker.shutdown().await;
    Ok(())
}
