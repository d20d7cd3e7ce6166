//! Host-facing lifecycle: install once, then answer requests.
//!
//! A host (the bundled [`Server`](crate::server::Server), or any embedding
//! runtime) drives a [`Worker`] through two entry points:
//!
//! - [`Worker::on_install`] — populate the cache before serving traffic.
//! - [`Worker::on_request`] — answer one intercepted request.
//!
//! [`OfflineWorker`] is the implementation backed by a [`FallbackFetcher`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

use crate::config::Config;
use crate::fetcher::{FallbackFetcher, FetchError};
use crate::http::{Request, Response, StatusCode};
use crate::network::Network;
use crate::store::{self, PreloadError, PreloadPolicy, Store};

/// The two lifecycle hooks a host calls.
pub trait Worker: Send + Sync + 'static {
    /// Prepares the cache. Returns the number of entries written.
    fn on_install(&self) -> impl Future<Output = Result<usize, PreloadError>> + Send;

    /// Answers one request. Always produces a response; total unavailability
    /// becomes a `503 Service Unavailable`.
    fn on_request(&self, request: Request) -> impl Future<Output = Response> + Send;
}

/// A [`Worker`] that preloads a fixed resource list and serves requests
/// through a [`FallbackFetcher`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use offcache::http::{Request, Response, StatusCode};
/// use offcache::network::StaticNetwork;
/// use offcache::store::{MemoryStorage, Storage};
/// use offcache::worker::{OfflineWorker, Worker};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let net = Arc::new(StaticNetwork::new());
/// net.route("/", Response::new(StatusCode::OK).body("home"));
/// let store = MemoryStorage::new().open("cache-5ht2-2.0.0").await?;
///
/// let worker = OfflineWorker::new(net.clone(), store, "http://localhost:8000").preload(["/"]);
/// assert_eq!(worker.on_install().await?, 1);
///
/// net.set_online(false);
/// let response = worker.on_request(Request::get("/")).await;
/// assert_eq!(response.body_bytes().as_ref(), b"home");
/// # Ok(())
/// # }
/// ```
pub struct OfflineWorker<N, S> {
    fetcher: FallbackFetcher<N, S>,
    preload: Vec<Request>,
    policy: PreloadPolicy,
}

impl<N, S> OfflineWorker<N, S>
where
    N: Network,
    S: Store,
{
    /// Creates a worker for `origin` with an empty preload list.
    pub fn new(network: Arc<N>, store: S, origin: impl Into<String>) -> Self {
        Self {
            fetcher: FallbackFetcher::new(network, store, origin),
            preload: Vec::new(),
            policy: PreloadPolicy::default(),
        }
    }

    /// Builds a worker from configuration. The store must already be open
    /// under `config.store_name`.
    pub fn from_config(config: &Config, network: Arc<N>, store: S) -> Self {
        let fetcher = FallbackFetcher::new(network, store, config.origin.as_str())
            .offline_page(&config.offline_page)
            .network_timeout(config.network_timeout());
        Self {
            fetcher,
            preload: Vec::new(),
            policy: config.preload_policy,
        }
        .preload(&config.preload)
    }

    /// Adds resource paths to fetch on install.
    #[must_use]
    pub fn preload<I>(mut self, paths: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.preload
            .extend(paths.into_iter().map(|path| Request::get(path.as_ref())));
        self
    }

    #[must_use]
    pub fn preload_policy(mut self, policy: PreloadPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn offline_page(mut self, path: &str) -> Self {
        self.fetcher = self.fetcher.offline_page(path);
        self
    }

    #[must_use]
    pub fn network_timeout(mut self, timeout: Duration) -> Self {
        self.fetcher = self.fetcher.network_timeout(timeout);
        self
    }

    pub fn fetcher(&self) -> &FallbackFetcher<N, S> {
        &self.fetcher
    }

    /// Waits for in-flight background refreshes. Hosts call this before
    /// exiting so late responses still reach the store.
    pub async fn shutdown(&self) {
        self.fetcher.settle().await;
    }
}

impl<N, S> Worker for OfflineWorker<N, S>
where
    N: Network,
    S: Store,
{
    async fn on_install(&self) -> Result<usize, PreloadError> {
        store::preload(
            self.fetcher.network(),
            self.fetcher.store(),
            self.fetcher.origin(),
            &self.preload,
            self.policy,
            self.fetcher.timeout(),
        )
        .await
    }

    async fn on_request(&self, request: Request) -> Response {
        let start = Instant::now();
        let method = request.method().clone();
        let target = request.target();

        let (response, source) = match self.fetcher.resolve(request).await {
            Ok(resolution) => (resolution.response, resolution.source.as_str()),
            Err(e @ FetchError::ServiceUnavailable { .. }) => (
                Response::new(StatusCode::SERVICE_UNAVAILABLE)
                    .header("Content-Type", "text/plain; charset=utf-8")
                    .body(format!("{e}\n")),
                "unavailable",
            ),
        };

        info!(
            method = %method,
            target = %target,
            status = response.status().as_u16(),
            source,
            elapsed = ?start.elapsed(),
            "served"
        );
        response
    }
}
