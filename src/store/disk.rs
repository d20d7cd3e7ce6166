//! Directory-backed storage.
//!
//! Layout: `<root>/<store name>/<sha256(key)>.entry`. Each entry file holds
//! one line of JSON metadata followed by the raw body bytes. Entries are
//! written to a temporary file and renamed into place, so readers see either
//! the old entry or the new one.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;

use super::{Storage, Store, StoreError, validate_name};
use crate::http::{Headers, RequestKey, Response, StatusCode};

const ENTRY_EXT: &str = "entry";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    key: String,
    status: u16,
    headers: Headers,
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Storage rooted at a directory; one subdirectory per store.
///
/// # Examples
///
/// ```no_run
/// use offcache::store::{DiskStorage, Storage};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), offcache::store::StoreError> {
/// let storage = DiskStorage::new(".offcache");
/// let store = storage.open("cache-5ht2-2.0.0").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Storage for DiskStorage {
    type Store = DiskStore;

    async fn open(&self, name: &str) -> Result<DiskStore, StoreError> {
        validate_name(name)?;
        let dir = self.root.join(name);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(&dir, e))?;
        Ok(DiskStore {
            name: Arc::from(name),
            dir: Arc::new(dir),
        })
    }

    async fn names(&self) -> Result<Vec<String>, StoreError> {
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.root, e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| io_error(&self.root, e))? {
            let is_dir = entry
                .file_type()
                .await
                .map_err(|e| io_error(&entry.path(), e))?
                .is_dir();
            if let (true, Some(name)) = (is_dir, entry.file_name().to_str()) {
                if validate_name(name).is_ok() {
                    names.push(name.to_owned());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        validate_name(name)?;
        let dir = self.root.join(name);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&dir, e)),
        }
    }
}

/// Handle to one on-disk store.
#[derive(Debug, Clone)]
pub struct DiskStore {
    name: Arc<str>,
    dir: Arc<PathBuf>,
}

impl DiskStore {
    fn entry_path(&self, key: &RequestKey) -> PathBuf {
        let digest = Sha256::digest(key.as_str().as_bytes());
        self.dir.join(format!("{}.{ENTRY_EXT}", hex::encode(digest)))
    }
}

impl Store for DiskStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, key: &RequestKey, response: &Response) -> Result<(), StoreError> {
        let meta = EntryMeta {
            key: key.as_str().to_owned(),
            status: response.status().as_u16(),
            headers: response.headers().clone(),
        };
        let mut contents = serde_json::to_vec(&meta).map_err(|e| StoreError::Corrupt {
            path: self.dir.display().to_string(),
            reason: e.to_string(),
        })?;
        contents.push(b'\n');
        contents.extend_from_slice(response.body_bytes());

        let path = self.entry_path(key);
        let tmp = path.with_extension(format!(
            "{}-{}.tmp",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&tmp, &contents)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(io_error(&path, e));
        }
        Ok(())
    }

    async fn lookup(&self, key: &RequestKey) -> Result<Option<Response>, StoreError> {
        let path = self.entry_path(key);
        let contents = match fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, e)),
        };

        let corrupt = |reason: String| StoreError::Corrupt {
            path: path.display().to_string(),
            reason,
        };
        let split = contents
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| corrupt("missing metadata line".to_owned()))?;
        let meta: EntryMeta =
            serde_json::from_slice(&contents[..split]).map_err(|e| corrupt(e.to_string()))?;
        if meta.key != key.as_str() {
            return Err(corrupt(format!("entry belongs to {:?}", meta.key)));
        }
        let status = StatusCode::from_u16(meta.status)
            .ok_or_else(|| corrupt(format!("status {} out of range", meta.status)))?;

        let body = Bytes::copy_from_slice(&contents[split + 1..]);
        Ok(Some(Response::from_parts(status, meta.headers, body)))
    }

    async fn remove(&self, key: &RequestKey) -> Result<bool, StoreError> {
        let path = self.entry_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(path: &str) -> RequestKey {
        RequestKey::resource("http://localhost", path)
    }

    #[tokio::test]
    async fn entries_survive_reopen() {
        let root = tempfile::tempdir().unwrap();
        let response = Response::new(StatusCode::OK)
            .header("Content-Type", "text/html")
            .body("<h1>offline</h1>\n");

        {
            let store = DiskStorage::new(root.path()).open("cache-5ht2-2.0.0").await.unwrap();
            store.put(&key("offline.html"), &response).await.unwrap();
        }

        let store = DiskStorage::new(root.path()).open("cache-5ht2-2.0.0").await.unwrap();
        let hit = store.lookup(&key("/offline.html")).await.unwrap().unwrap();
        assert_eq!(hit, response);
    }

    #[tokio::test]
    async fn missing_entry_is_none() {
        let root = tempfile::tempdir().unwrap();
        let store = DiskStorage::new(root.path()).open("cache-v1").await.unwrap();
        assert!(store.lookup(&key("/nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn overwrite_leaves_one_file() {
        let root = tempfile::tempdir().unwrap();
        let store = DiskStorage::new(root.path()).open("cache-v1").await.unwrap();
        store.put(&key("/"), &Response::new(StatusCode::NOT_FOUND)).await.unwrap();
        store.put(&key("/"), &Response::new(StatusCode::OK).body("home")).await.unwrap();

        let files = std::fs::read_dir(root.path().join("cache-v1")).unwrap().count();
        assert_eq!(files, 1);
        let hit = store.lookup(&key("/")).await.unwrap().unwrap();
        assert_eq!(hit.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unregistered_status_survives_reopen() {
        let root = tempfile::tempdir().unwrap();
        let multi = StatusCode::from_u16(207).unwrap();
        {
            let store = DiskStorage::new(root.path()).open("cache-v1").await.unwrap();
            store.put(&key("/dav"), &Response::new(multi).body("<multistatus/>")).await.unwrap();
        }

        let store = DiskStorage::new(root.path()).open("cache-v1").await.unwrap();
        let hit = store.lookup(&key("/dav")).await.unwrap().unwrap();
        assert_eq!(hit.status(), multi);
    }

    #[tokio::test]
    async fn remove_deletes_the_entry_file() {
        let root = tempfile::tempdir().unwrap();
        let store = DiskStorage::new(root.path()).open("cache-v1").await.unwrap();
        store.put(&key("/"), &Response::new(StatusCode::OK)).await.unwrap();

        assert!(store.remove(&key("/")).await.unwrap());
        assert!(!store.remove(&key("/")).await.unwrap());
        assert!(store.lookup(&key("/")).await.unwrap().is_none());
        assert_eq!(std::fs::read_dir(root.path().join("cache-v1")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unavailable_medium_fails_open() {
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let err = DiskStorage::new(&blocker).open("cache-v1").await.unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
    }

    #[tokio::test]
    async fn truncated_entry_is_corrupt() {
        let root = tempfile::tempdir().unwrap();
        let store = DiskStorage::new(root.path()).open("cache-v1").await.unwrap();
        std::fs::write(store.entry_path(&key("/")), b"{\"key\":").unwrap();

        assert!(matches!(
            store.lookup(&key("/")).await,
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn names_and_delete() {
        let root = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(root.path().join("stores"));
        assert!(storage.names().await.unwrap().is_empty());

        storage.open("cache-2.0.0").await.unwrap();
        storage.open("cache-1.0.0").await.unwrap();
        assert_eq!(storage.names().await.unwrap(), vec!["cache-1.0.0", "cache-2.0.0"]);

        assert!(storage.delete("cache-1.0.0").await.unwrap());
        assert!(!storage.delete("cache-1.0.0").await.unwrap());
        assert_eq!(storage.names().await.unwrap(), vec!["cache-2.0.0"]);
    }
}
