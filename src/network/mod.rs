//! The network seam: how the fetcher reaches the live origin.
//!
//! - [`Network`] — trait implemented by every transport.
//! - [`HttpNetwork`] — HTTP/1.0 client for a plain `http://` upstream.
//! - [`StaticNetwork`] — in-memory origin with an on/off switch, for tests
//!   and fixture hosts.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::http::{Request, Response, response::ResponseError};

mod client;
mod fixture;

pub use fixture::StaticNetwork;
pub use client::HttpNetwork;

/// Errors produced while fetching from the network.
///
/// These never reach a caller of the fetcher: any of them moves the request
/// into the cache fallback path.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed upstream response: {0}")]
    Malformed(#[from] ResponseError),

    #[error("upstream response exceeds {max_bytes} bytes")]
    TooLarge { max_bytes: usize },

    #[error("no response within {timeout_ms} ms")]
    Timeout { timeout_ms: u128 },

    #[error("network is offline")]
    Offline,

    #[error("unsupported origin {origin:?}: only http:// is supported")]
    UnsupportedOrigin { origin: String },
}

/// A transport that can fetch a request from the live origin.
///
/// Implementations must be shareable across tasks: the fetcher calls
/// [`fetch`](Self::fetch) from the request path and from background
/// refresh tasks at the same time.
pub trait Network: Send + Sync + 'static {
    /// Fetches `request` from the origin.
    ///
    /// Any HTTP status is a successful fetch; only transport failures are
    /// errors.
    fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response, NetworkError>> + Send;
}

/// Fetches `request`, giving up after `timeout`.
///
/// Timeouts surface as [`NetworkError::Timeout`] so callers treat them like
/// any other transport failure.
pub async fn fetch_within<N: Network>(
    network: &N,
    request: &Request,
    timeout: Duration,
) -> Result<Response, NetworkError> {
    match tokio::time::timeout(timeout, network.fetch(request)).await {
        Ok(result) => result,
        Err(_) => Err(NetworkError::Timeout {
            timeout_ms: timeout.as_millis(),
        }),
    }
}
