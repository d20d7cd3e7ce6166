//! Named, versioned response stores.
//!
//! A [`Storage`] owns a family of stores addressed by name. The name embeds a
//! version stamp (`cache-5ht2-2.0.0`), so bumping the version opens a fresh,
//! isolated store and leaves the previous one orphaned until someone calls
//! [`prune`].
//!
//! ## Core types
//!
//! - [`Storage`] — opens, lists and deletes stores by name.
//! - [`Store`] — a handle to one store: [`put`](Store::put) and
//!   [`lookup`](Store::lookup) keyed by [`RequestKey`].
//! - [`MemoryStorage`] / [`DiskStorage`] — the two backends.
//! - [`preload`] — eager population of a store from the network.

use std::future::Future;

use thiserror::Error;
use tracing::info;

use crate::http::{RequestKey, Response};

mod disk;
mod memory;
mod preload;

pub use disk::{DiskStorage, DiskStore};
pub use memory::{MemoryStorage, MemoryStore};
pub use preload::{PreloadCause, PreloadError, PreloadFailure, PreloadPolicy, preload};

/// Errors produced by the storage medium.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid store name {name:?}")]
    InvalidName { name: String },

    #[error("store {store:?} quota of {quota_bytes} bytes exceeded")]
    QuotaExceeded { store: String, quota_bytes: usize },

    #[error("corrupt cache entry at {path}: {reason}")]
    Corrupt { path: String, reason: String },
}

/// A handle to one named store.
///
/// Handles are cheap to clone and all clones see the same entries. Each
/// `put` and `lookup` is atomic for a single entry; concurrent writers to the
/// same key race and the last write wins.
pub trait Store: Clone + Send + Sync + 'static {
    /// Returns the store's name.
    fn name(&self) -> &str;

    /// Stores `response` under `key`, replacing any previous entry.
    ///
    /// The store keeps its own copy of the response; the caller's value is
    /// untouched and can still be returned to a client.
    fn put(
        &self,
        key: &RequestKey,
        response: &Response,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Returns the entry stored under `key`, if any.
    fn lookup(
        &self,
        key: &RequestKey,
    ) -> impl Future<Output = Result<Option<Response>, StoreError>> + Send;

    /// Drops the entry under `key`. Returns `false` if there was none.
    fn remove(&self, key: &RequestKey) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

/// A family of named stores on one storage medium.
pub trait Storage: Send + Sync {
    type Store: Store;

    /// Opens the store called `name`, creating it if absent.
    ///
    /// Opening the same name twice returns handles to the same entries.
    fn open(&self, name: &str) -> impl Future<Output = Result<Self::Store, StoreError>> + Send;

    /// Lists the names of every existing store, sorted.
    fn names(&self) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// Deletes the store called `name`. Returns `false` if it did not exist.
    fn delete(&self, name: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

/// Deletes every store except `keep`, returning the names removed.
///
/// This is the cleanup for stores orphaned by a version bump. It is never
/// run implicitly.
pub async fn prune<S: Storage>(storage: &S, keep: &str) -> Result<Vec<String>, StoreError> {
    let mut removed = Vec::new();
    for name in storage.names().await? {
        if name != keep && storage.delete(&name).await? {
            info!(store = %name, "deleted orphaned store");
            removed.push(name);
        }
    }
    Ok(removed)
}

/// Store names become directory names on disk, so they are restricted to a
/// conservative character set.
pub(crate) fn validate_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName {
            name: name.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::StatusCode;

    #[test]
    fn versioned_names_are_valid() {
        assert!(validate_name("cache-5ht2-2.0.0").is_ok());
        assert!(validate_name("cache_v3").is_ok());
    }

    #[test]
    fn path_like_names_are_rejected() {
        for name in ["", "..", ".hidden", "a/b", "a\\b", "cache 1"] {
            assert!(
                matches!(validate_name(name), Err(StoreError::InvalidName { .. })),
                "{name:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn prune_keeps_only_current_version() {
        let storage = MemoryStorage::new();
        let old = storage.open("cache-5ht2-1.0.0").await.unwrap();
        old.put(
            &RequestKey::resource("http://localhost", "/"),
            &Response::new(StatusCode::OK),
        )
        .await
        .unwrap();
        storage.open("cache-5ht2-1.1.0").await.unwrap();
        storage.open("cache-5ht2-2.0.0").await.unwrap();

        let removed = prune(&storage, "cache-5ht2-2.0.0").await.unwrap();
        assert_eq!(removed, vec!["cache-5ht2-1.0.0", "cache-5ht2-1.1.0"]);
        assert_eq!(storage.names().await.unwrap(), vec!["cache-5ht2-2.0.0"]);
    }
}
