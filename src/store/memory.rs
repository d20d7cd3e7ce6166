use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use super::{Storage, Store, StoreError, validate_name};
use crate::http::{RequestKey, Response};

/// In-process storage. Stores live as long as the `MemoryStorage` (or any
/// handle to them) does.
///
/// # Examples
///
/// ```
/// use offcache::http::{RequestKey, Response, StatusCode};
/// use offcache::store::{MemoryStorage, Storage, Store};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), offcache::store::StoreError> {
/// let storage = MemoryStorage::new();
/// let store = storage.open("cache-5ht2-2.0.0").await?;
/// let key = RequestKey::resource("http://localhost", "/");
///
/// store.put(&key, &Response::new(StatusCode::OK).body("home")).await?;
/// let again = storage.open("cache-5ht2-2.0.0").await?;
/// assert!(again.lookup(&key).await?.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    stores: Arc<Mutex<HashMap<String, MemoryStore>>>,
    quota: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits every store opened from this storage to `bytes` of headers
    /// and bodies.
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            stores: Arc::default(),
            quota: Some(bytes),
        }
    }

    fn stores(&self) -> std::sync::MutexGuard<'_, HashMap<String, MemoryStore>> {
        self.stores.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Storage for MemoryStorage {
    type Store = MemoryStore;

    async fn open(&self, name: &str) -> Result<MemoryStore, StoreError> {
        validate_name(name)?;
        let store = self
            .stores()
            .entry(name.to_owned())
            .or_insert_with(|| MemoryStore::new(name, self.quota))
            .clone();
        Ok(store)
    }

    async fn names(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self.stores().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.stores().remove(name).is_some())
    }
}

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<RequestKey, Response>,
    bytes: usize,
}

/// Handle to an in-memory store.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    name: Arc<str>,
    entries: Arc<RwLock<Entries>>,
    quota: Option<usize>,
}

impl MemoryStore {
    fn new(name: &str, quota: Option<usize>) -> Self {
        Self {
            name: Arc::from(name),
            entries: Arc::default(),
            quota,
        }
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.read().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes of headers and bodies currently stored.
    pub fn size_bytes(&self) -> usize {
        self.read().bytes
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn footprint(response: &Response) -> usize {
    let headers: usize = response
        .headers()
        .iter()
        .map(|(name, value)| name.len() + value.len())
        .sum();
    headers + response.body_bytes().len()
}

impl Store for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, key: &RequestKey, response: &Response) -> Result<(), StoreError> {
        let incoming = footprint(response);
        let mut entries = self.write();
        let replaced = entries.map.get(key).map(footprint).unwrap_or(0);
        let total = entries.bytes - replaced + incoming;

        match self.quota {
            Some(quota) if total > quota => {
                return Err(StoreError::QuotaExceeded {
                    store: self.name.to_string(),
                    quota_bytes: quota,
                });
            }
            _ => {}
        }

        entries.map.insert(key.clone(), response.clone());
        entries.bytes = total;
        Ok(())
    }

    async fn lookup(&self, key: &RequestKey) -> Result<Option<Response>, StoreError> {
        Ok(self.read().map.get(key).cloned())
    }

    async fn remove(&self, key: &RequestKey) -> Result<bool, StoreError> {
        let mut entries = self.write();
        match entries.map.remove(key) {
            Some(old) => {
                entries.bytes -= footprint(&old);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::StatusCode;

    fn key(path: &str) -> RequestKey {
        RequestKey::resource("http://localhost", path)
    }

    #[tokio::test]
    async fn lookup_missing_is_none() {
        let store = MemoryStorage::new().open("cache-v1").await.unwrap();
        assert_eq!(store.lookup(&key("/")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn last_write_wins() {
        let store = MemoryStorage::new().open("cache-v1").await.unwrap();
        store.put(&key("/"), &Response::new(StatusCode::OK).body("first")).await.unwrap();
        store.put(&key("/"), &Response::new(StatusCode::OK).body("second")).await.unwrap();

        let hit = store.lookup(&key("/")).await.unwrap().unwrap();
        assert_eq!(hit.body_bytes().as_ref(), b"second");
        assert_eq!(store.len(), 1);
        assert_eq!(store.size_bytes(), "second".len());
    }

    #[tokio::test]
    async fn put_twice_is_idempotent() {
        let store = MemoryStorage::new().open("cache-v1").await.unwrap();
        let response = Response::new(StatusCode::OK).header("Content-Type", "text/css").body("a{}");

        store.put(&key("/a.css"), &response).await.unwrap();
        let once = (store.len(), store.size_bytes(), store.lookup(&key("/a.css")).await.unwrap());
        store.put(&key("/a.css"), &response).await.unwrap();
        let twice = (store.len(), store.size_bytes(), store.lookup(&key("/a.css")).await.unwrap());

        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn stores_are_isolated_by_name() {
        let storage = MemoryStorage::new();
        let v1 = storage.open("cache-1.0.0").await.unwrap();
        let v2 = storage.open("cache-2.0.0").await.unwrap();
        v1.put(&key("/"), &Response::new(StatusCode::OK)).await.unwrap();
        assert!(v2.lookup(&key("/")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn quota_rejects_oversized_put() {
        let storage = MemoryStorage::with_quota(8);
        let store = storage.open("cache-v1").await.unwrap();
        store.put(&key("/small"), &Response::new(StatusCode::OK).body("1234")).await.unwrap();

        let err = store
            .put(&key("/big"), &Response::new(StatusCode::OK).body("123456789"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { quota_bytes: 8, .. }));
        assert!(store.lookup(&key("/big")).await.unwrap().is_none());

        // Replacing an entry only counts the difference.
        store.put(&key("/small"), &Response::new(StatusCode::OK).body("12345678")).await.unwrap();
        assert_eq!(store.size_bytes(), 8);
    }

    #[tokio::test]
    async fn remove_releases_quota() {
        let store = MemoryStorage::with_quota(4).open("cache-v1").await.unwrap();
        store.put(&key("/a"), &Response::new(StatusCode::OK).body("aaaa")).await.unwrap();

        assert!(store.remove(&key("/a")).await.unwrap());
        assert!(!store.remove(&key("/a")).await.unwrap());
        assert_eq!(store.size_bytes(), 0);
        store.put(&key("/b"), &Response::new(StatusCode::OK).body("bbbb")).await.unwrap();
    }
}
