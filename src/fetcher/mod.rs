//! The fallback fetcher: per request, decide between network, cache and the
//! offline page, and keep the cache fresh in the background.
//!
//! ## Resolution order
//!
//! 1. Try the network, bounded by the configured timeout. A response with
//!    any status other than `404` is served as is.
//! 2. On a transport failure, a timeout, or a `404`, look the request up in
//!    the store. A hit whose stored status is not `404` is served.
//! 3. Otherwise serve the offline page stored under the offline key.
//! 4. If that is missing too, the request fails with
//!    [`FetchError::ServiceUnavailable`].
//!
//! A `404` counts as a failure on both sides: the fetcher never serves a
//! cached copy of a resource the origin says is gone, and it never serves a
//! cached `404` in place of the offline page. Transient and permanent `404`s
//! are not distinguished.
//!
//! Independently of which branch answers, every intercepted `GET` spawns a
//! refresh task that fetches the request again and writes whatever comes back
//! into the store. Refresh failures are logged and otherwise ignored.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::http::{CacheMode, Method, Request, RequestKey, RequestMode, Response, StatusCode};
use crate::network::{self, Network};
use crate::store::Store;

/// Default bound on a single network attempt.
pub const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(10);

/// Default key of the offline placeholder document.
pub const DEFAULT_OFFLINE_PAGE: &str = "offline.html";

/// Errors surfaced to the caller of [`FallbackFetcher::handle`].
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("service unavailable: no network, cache entry or offline page for {key}")]
    ServiceUnavailable { key: RequestKey },
}

/// Which branch produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Network,
    Cache,
    Offline,
    /// The request was not intercepted and went straight to the network.
    Passthrough,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Cache => "cache",
            Self::Offline => "offline",
            Self::Passthrough => "passthrough",
        }
    }
}

/// A response together with the branch that produced it.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub source: Source,
    pub response: Response,
}

/// Network-first fetcher with cache fallback and background refresh.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use offcache::fetcher::{FallbackFetcher, Source};
/// use offcache::http::{Request, Response, StatusCode};
/// use offcache::network::StaticNetwork;
/// use offcache::store::{MemoryStorage, Storage};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let net = Arc::new(StaticNetwork::new());
/// net.route("/", Response::new(StatusCode::OK).body("home"));
/// let store = MemoryStorage::new().open("cache-5ht2-2.0.0").await?;
/// let fetcher = FallbackFetcher::new(Arc::clone(&net), store, "http://localhost:8000");
///
/// let online = fetcher.resolve(Request::get("/")).await?;
/// assert_eq!(online.source, Source::Network);
/// fetcher.settle().await;
///
/// net.set_online(false);
/// let offline = fetcher.resolve(Request::get("/")).await?;
/// assert_eq!(offline.source, Source::Cache);
/// assert_eq!(offline.response.body_bytes().as_ref(), b"home");
/// # Ok(())
/// # }
/// ```
pub struct FallbackFetcher<N, S> {
    network: Arc<N>,
    store: S,
    origin: String,
    offline_key: RequestKey,
    timeout: Duration,
    refreshes: Mutex<JoinSet<()>>,
}

impl<N, S> FallbackFetcher<N, S>
where
    N: Network,
    S: Store,
{
    /// Creates a fetcher for requests within `origin`, backed by `store`.
    pub fn new(network: Arc<N>, store: S, origin: impl Into<String>) -> Self {
        let origin = origin.into();
        Self {
            offline_key: RequestKey::resource(&origin, DEFAULT_OFFLINE_PAGE),
            network,
            store,
            origin,
            timeout: DEFAULT_NETWORK_TIMEOUT,
            refreshes: Mutex::new(JoinSet::new()),
        }
    }

    /// Sets the resource served when neither network nor cache can answer.
    #[must_use]
    pub fn offline_page(mut self, path: &str) -> Self {
        self.offline_key = RequestKey::resource(&self.origin, path);
        self
    }

    /// Bounds each network attempt, including refreshes.
    #[must_use]
    pub fn network_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn network(&self) -> &Arc<N> {
        &self.network
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn offline_key(&self) -> &RequestKey {
        &self.offline_key
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Answers `request` from the network, the cache, or the offline page.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::ServiceUnavailable`] only when all three are
    /// unavailable.
    pub async fn handle(&self, request: Request) -> Result<Response, FetchError> {
        self.resolve(request).await.map(|resolution| resolution.response)
    }

    /// Like [`handle`](Self::handle), but also reports which branch answered.
    pub async fn resolve(&self, request: Request) -> Result<Resolution, FetchError> {
        let key = RequestKey::for_request(&self.origin, &request);

        if !intercepts(&request) {
            debug!(key = %key, "only-if-cached cross-origin request, not intercepted");
            return match network::fetch_within(&*self.network, &request, self.timeout).await {
                Ok(response) => Ok(Resolution {
                    source: Source::Passthrough,
                    response,
                }),
                Err(e) => {
                    debug!(key = %key, error = %e, "passthrough fetch failed");
                    Err(FetchError::ServiceUnavailable { key })
                }
            };
        }

        self.refresh(request.clone());

        match network::fetch_within(&*self.network, &request, self.timeout).await {
            Ok(response) if response.status() != StatusCode::NOT_FOUND => {
                return Ok(Resolution {
                    source: Source::Network,
                    response,
                });
            }
            Ok(_) => debug!(key = %key, "network answered 404, falling back"),
            Err(e) => debug!(key = %key, error = %e, "network attempt failed, falling back"),
        }

        self.fallback(key).await
    }

    async fn fallback(&self, key: RequestKey) -> Result<Resolution, FetchError> {
        match self.store.lookup(&key).await {
            Ok(Some(cached)) if cached.status() != StatusCode::NOT_FOUND => {
                return Ok(Resolution {
                    source: Source::Cache,
                    response: cached,
                });
            }
            Ok(Some(_)) => debug!(key = %key, "cached entry is a 404, ignoring it"),
            Ok(None) => debug!(key = %key, "no cached entry"),
            Err(e) => warn!(key = %key, error = %e, "cache lookup failed"),
        }

        match self.store.lookup(&self.offline_key).await {
            Ok(Some(page)) => Ok(Resolution {
                source: Source::Offline,
                response: page,
            }),
            Ok(None) => {
                warn!(key = %key, offline = %self.offline_key, "offline page is not cached");
                Err(FetchError::ServiceUnavailable { key })
            }
            Err(e) => {
                warn!(key = %key, error = %e, "offline page lookup failed");
                Err(FetchError::ServiceUnavailable { key })
            }
        }
    }

    /// Spawns a background task that re-fetches `request` and stores the
    /// result, whatever its status.
    ///
    /// Only `GET` requests are written. The task's outcome is only logged;
    /// call [`settle`](Self::settle) to wait for in-flight refreshes.
    pub fn refresh(&self, request: Request) {
        if request.method() != &Method::Get {
            debug!(method = %request.method(), path = %request.path(), "not refreshing non-GET request");
            return;
        }

        let key = RequestKey::for_request(&self.origin, &request);
        let network = Arc::clone(&self.network);
        let store = self.store.clone();
        let timeout = self.timeout;

        let mut refreshes = self.refreshes();
        // Reap finished refreshes so a long-lived fetcher does not accumulate them.
        while refreshes.try_join_next().is_some() {}
        refreshes.spawn(async move {
            let response = match network::fetch_within(&*network, &request, timeout).await {
                Ok(response) => response,
                Err(e) => {
                    debug!(key = %key, error = %e, "refresh fetch failed");
                    return;
                }
            };
            match store.put(&key, &response).await {
                Ok(()) => debug!(key = %key, status = response.status().as_u16(), "cache refreshed"),
                Err(e) => warn!(key = %key, error = %e, "refresh could not store response"),
            }
        });
    }

    /// Waits until every refresh spawned so far has finished.
    pub async fn settle(&self) {
        let mut pending = std::mem::take(&mut *self.refreshes());
        while let Some(result) = pending.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "refresh task failed");
            }
        }
    }

    fn refreshes(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.refreshes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// `only-if-cached` requests from another origin are left to the host:
/// intercepting them would leak cached cross-origin responses.
fn intercepts(request: &Request) -> bool {
    !(request.cache() == CacheMode::OnlyIfCached && request.fetch_mode() != RequestMode::SameOrigin)
}
