//! # offcache
//!
//! A stale-while-fallback HTTP response cache for offline-capable clients.
//!
//! Every request is tried against the network first. When the network fails
//! or answers `404`, the last good copy from the cache is served, and when
//! there is none, a preloaded offline page. Each request also refreshes its
//! cache entry in the background, whichever branch answered it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use offcache::network::HttpNetwork;
//! use offcache::store::{DiskStorage, Storage};
//! use offcache::worker::{OfflineWorker, Worker};
//! use offcache::{Config, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let network = Arc::new(HttpNetwork::new(&config.origin)?);
//!     let store = DiskStorage::new(&config.storage_dir).open(&config.store_name).await?;
//!     let worker = Arc::new(OfflineWorker::from_config(&config, network, store));
//!
//!     if let Err(e) = worker.on_install().await {
//!         eprintln!("preload failed: {e}");
//!     }
//!     Server::bind(&config.listen).await?.serve(worker, std::future::pending()).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod fetcher;
pub mod http;
pub mod network;
pub mod server;
pub mod store;
pub mod worker;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use config::{Config, ConfigError};
pub use fetcher::{FallbackFetcher, FetchError, Resolution, Source};
pub use http::{Headers, Method, Request, RequestKey, Response, StatusCode};
pub use network::{HttpNetwork, Network, NetworkError, StaticNetwork};
pub use server::{Server, ServerError};
pub use store::{
    DiskStorage, MemoryStorage, PreloadError, PreloadPolicy, Storage, Store, StoreError,
};
pub use worker::{OfflineWorker, Worker};
