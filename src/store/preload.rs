//! Eager population of a store from a fixed resource list.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{Store, StoreError};
use crate::http::{Request, RequestKey, Response, StatusCode};
use crate::network::{self, Network, NetworkError};

/// What to do when some resources in a preload batch cannot be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreloadPolicy {
    /// Any failure aborts the batch and nothing is written.
    #[default]
    AllOrNothing,
    /// Every resource that was fetched is written; failures are reported
    /// afterwards as [`PreloadError::Partial`].
    BestEffort,
}

/// Why one resource could not be preloaded.
#[derive(Debug)]
pub enum PreloadCause {
    Network(NetworkError),
    /// The origin answered, but not with a 2xx status.
    Status(StatusCode),
    /// The fetch task itself died.
    Task(String),
}

/// One resource that failed to preload.
#[derive(Debug)]
pub struct PreloadFailure {
    pub key: RequestKey,
    pub cause: PreloadCause,
}

impl fmt::Display for PreloadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            PreloadCause::Network(e) => write!(f, "{}: {e}", self.key),
            PreloadCause::Status(status) => write!(f, "{}: origin answered {status}", self.key),
            PreloadCause::Task(e) => write!(f, "{}: fetch task failed: {e}", self.key),
        }
    }
}

/// Errors produced by [`preload`].
#[derive(Debug, Error)]
pub enum PreloadError {
    #[error("preload aborted: {} of {total} resources failed", .failures.len())]
    Aborted {
        total: usize,
        failures: Vec<PreloadFailure>,
    },

    #[error("preload incomplete: stored {stored} of {total} resources")]
    Partial {
        stored: usize,
        total: usize,
        failures: Vec<PreloadFailure>,
    },

    #[error("storage failed during preload: {0}")]
    Storage(#[from] StoreError),
}

impl PreloadError {
    /// The resources that could not be fetched.
    pub fn failures(&self) -> &[PreloadFailure] {
        match self {
            Self::Aborted { failures, .. } | Self::Partial { failures, .. } => failures,
            Self::Storage(_) => &[],
        }
    }
}

/// Fetches every resource in `resources` and writes it into `store` under
/// its key within `origin`.
///
/// All fetches run concurrently, each bounded by `timeout`. A fetch fails on
/// a transport error or a non-2xx status. On success returns the number of
/// entries written.
///
/// # Errors
///
/// - [`PreloadError::Aborted`] — under [`PreloadPolicy::AllOrNothing`], when
///   any fetch failed. The store is untouched.
/// - [`PreloadError::Partial`] — under [`PreloadPolicy::BestEffort`], when
///   any fetch failed. The successful ones were written.
/// - [`PreloadError::Storage`] — a write failed. Under
///   [`PreloadPolicy::AllOrNothing`] the entries written before it are
///   rolled back.
pub async fn preload<N, S>(
    network: &Arc<N>,
    store: &S,
    origin: &str,
    resources: &[Request],
    policy: PreloadPolicy,
    timeout: Duration,
) -> Result<usize, PreloadError>
where
    N: Network,
    S: Store,
{
    let total = resources.len();
    info!(store = %store.name(), total, ?policy, "preloading resources");

    let handles: Vec<_> = resources
        .iter()
        .map(|request| {
            let network = Arc::clone(network);
            let request = request.clone();
            tokio::spawn(async move { network::fetch_within(&*network, &request, timeout).await })
        })
        .collect();

    let mut fetched: Vec<(RequestKey, Response)> = Vec::with_capacity(total);
    let mut failures = Vec::new();
    for (request, handle) in resources.iter().zip(handles) {
        let key = RequestKey::for_request(origin, request);
        let cause = match handle.await {
            Ok(Ok(response)) if response.status().is_success() => {
                fetched.push((key, response));
                continue;
            }
            Ok(Ok(response)) => PreloadCause::Status(response.status()),
            Ok(Err(e)) => PreloadCause::Network(e),
            Err(e) => PreloadCause::Task(e.to_string()),
        };
        let failure = PreloadFailure { key, cause };
        warn!(failure = %failure, "preload fetch failed");
        failures.push(failure);
    }

    if !failures.is_empty() && policy == PreloadPolicy::AllOrNothing {
        return Err(PreloadError::Aborted { total, failures });
    }

    match policy {
        PreloadPolicy::AllOrNothing => write_all(store, &fetched).await?,
        PreloadPolicy::BestEffort => {
            for (key, response) in &fetched {
                store.put(key, response).await?;
                debug!(key = %key, "preloaded");
            }
        }
    }

    let stored = fetched.len();
    if failures.is_empty() {
        info!(store = %store.name(), stored, "preload complete");
        Ok(stored)
    } else {
        Err(PreloadError::Partial {
            stored,
            total,
            failures,
        })
    }
}

/// Writes every entry, or none of them: on a storage error the entries
/// already written are restored to what the store held before.
async fn write_all<S: Store>(store: &S, fetched: &[(RequestKey, Response)]) -> Result<(), StoreError> {
    let mut written = Vec::with_capacity(fetched.len());
    for (key, response) in fetched {
        let step = async {
            let previous = store.lookup(key).await?;
            store.put(key, response).await?;
            Ok::<_, StoreError>(previous)
        }
        .await;
        match step {
            Ok(previous) => {
                debug!(key = %key, "preloaded");
                written.push((key, previous));
            }
            Err(e) => {
                rollback(store, written).await;
                return Err(e);
            }
        }
    }
    Ok(())
}

async fn rollback<S: Store>(store: &S, written: Vec<(&RequestKey, Option<Response>)>) {
    for (key, previous) in written.into_iter().rev() {
        let restored = match previous {
            Some(previous) => store.put(key, &previous).await,
            None => store.remove(key).await.map(drop),
        };
        match restored {
            Ok(()) => debug!(key = %key, "rolled back preloaded entry"),
            Err(e) => warn!(key = %key, error = %e, "failed to roll back preloaded entry"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::StaticNetwork;
    use crate::store::{MemoryStorage, Storage};

    const ORIGIN: &str = "http://localhost:8000";
    const TIMEOUT: Duration = Duration::from_secs(5);

    fn assets() -> Vec<Request> {
        ["/static/gruvbox.css", "/", "/static/elm.js"]
            .into_iter()
            .map(Request::get)
            .collect()
    }

    fn origin_with_assets() -> Arc<StaticNetwork> {
        let net = StaticNetwork::new();
        net.route("/static/gruvbox.css", Response::new(StatusCode::OK).body("css"));
        net.route("/", Response::new(StatusCode::OK).body("home"));
        net.route("/static/elm.js", Response::new(StatusCode::OK).body("js"));
        Arc::new(net)
    }

    #[tokio::test]
    async fn every_resource_is_stored() {
        let net = origin_with_assets();
        let store = MemoryStorage::new().open("cache-5ht2-2.0.0").await.unwrap();

        let stored = preload(&net, &store, ORIGIN, &assets(), PreloadPolicy::AllOrNothing, TIMEOUT)
            .await
            .unwrap();

        assert_eq!(stored, 3);
        for request in assets() {
            let key = RequestKey::for_request(ORIGIN, &request);
            assert!(store.lookup(&key).await.unwrap().is_some(), "{key} missing");
        }
    }

    #[tokio::test]
    async fn all_or_nothing_writes_nothing_on_failure() {
        let net = origin_with_assets();
        net.unroute("/static/elm.js");
        let store = MemoryStorage::new().open("cache-v1").await.unwrap();

        let err = preload(&net, &store, ORIGIN, &assets(), PreloadPolicy::AllOrNothing, TIMEOUT)
            .await
            .unwrap_err();

        assert!(matches!(err, PreloadError::Aborted { total: 3, .. }));
        assert_eq!(err.failures().len(), 1);
        assert!(matches!(err.failures()[0].cause, PreloadCause::Status(StatusCode::NOT_FOUND)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn best_effort_keeps_successes() {
        let net = origin_with_assets();
        net.script("/", None);
        let store = MemoryStorage::new().open("cache-v1").await.unwrap();

        let err = preload(&net, &store, ORIGIN, &assets(), PreloadPolicy::BestEffort, TIMEOUT)
            .await
            .unwrap_err();

        match &err {
            PreloadError::Partial { stored, total, failures } => {
                assert_eq!((*stored, *total), (2, 3));
                assert_eq!(failures[0].key, RequestKey::resource(ORIGIN, "/"));
                assert!(matches!(failures[0].cause, PreloadCause::Network(NetworkError::Offline)));
            }
            other => panic!("expected partial preload, got {other:?}"),
        }
        assert_eq!(store.len(), 2);
        assert!(store.lookup(&RequestKey::resource(ORIGIN, "/")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn storage_failure_is_reported() {
        let net = origin_with_assets();
        let store = MemoryStorage::with_quota(4).open("cache-v1").await.unwrap();

        let err = preload(&net, &store, ORIGIN, &assets(), PreloadPolicy::AllOrNothing, TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, PreloadError::Storage(StoreError::QuotaExceeded { .. })));
        assert!(store.is_empty());
        assert_eq!(store.size_bytes(), 0);
    }

    #[tokio::test]
    async fn storage_failure_restores_previous_entries() {
        let net = StaticNetwork::new();
        net.route("/a", Response::new(StatusCode::OK).body("aaa"));
        net.route("/b", Response::new(StatusCode::OK).body("bbbbbbbb"));
        let net = Arc::new(net);
        let store = MemoryStorage::with_quota(4).open("cache-v1").await.unwrap();
        let a = RequestKey::resource(ORIGIN, "/a");
        store.put(&a, &Response::new(StatusCode::OK).body("old")).await.unwrap();

        let resources = [Request::get("/a"), Request::get("/b")];
        let err = preload(&net, &store, ORIGIN, &resources, PreloadPolicy::AllOrNothing, TIMEOUT)
            .await
            .unwrap_err();

        assert!(matches!(err, PreloadError::Storage(_)));
        assert_eq!(store.len(), 1);
        let kept = store.lookup(&a).await.unwrap().unwrap();
        assert_eq!(kept.body_bytes().as_ref(), b"old");
        assert!(store.lookup(&RequestKey::resource(ORIGIN, "/b")).await.unwrap().is_none());
    }
}
