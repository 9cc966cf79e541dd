//! Backing storage for evicted payloads.

use std::collections::HashMap;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{RuntimeError, RuntimeResult};
use crate::table::{DataItem, ReloadKey};

/// Tracing target for payload storage.
const TRACING_TARGET: &str = "strata_runtime::cache::storage";

/// Persists payloads under reload keys so they can be dropped from memory.
///
/// Implementations must make `load` return exactly what `store` was given.
/// Failures are reported as [`RuntimeError::CacheIo`].
#[async_trait]
pub trait Storage: Send + Sync {
    /// Persists a payload, replacing any previous payload under the key.
    async fn store(&self, key: ReloadKey, item: &DataItem) -> RuntimeResult<()>;

    /// Loads a previously persisted payload.
    async fn load(&self, key: ReloadKey) -> RuntimeResult<DataItem>;

    /// Deletes a payload. Deleting a missing key is not an error.
    async fn remove(&self, key: ReloadKey) -> RuntimeResult<()>;
}

/// In-process storage, mainly for tests and short-lived runs.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RwLock<HashMap<ReloadKey, DataItem>>,
}

impl MemoryStorage {
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored payloads.
    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    /// Returns whether nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn store(&self, key: ReloadKey, item: &DataItem) -> RuntimeResult<()> {
        self.items.write().await.insert(key, item.clone());
        Ok(())
    }

    async fn load(&self, key: ReloadKey) -> RuntimeResult<DataItem> {
        self.items
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| RuntimeError::CacheIo {
                message: format!("payload {key} not found"),
                source: None,
            })
    }

    async fn remove(&self, key: ReloadKey) -> RuntimeResult<()> {
        self.items.write().await.remove(&key);
        Ok(())
    }
}

/// Storage writing one JSON file per payload below a root directory.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Creates a storage rooted at `root`.
    ///
    /// The directory is created on the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, key: ReloadKey) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn store(&self, key: ReloadKey, item: &DataItem) -> RuntimeResult<()> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            RuntimeError::cache_io(format!("cannot create {}", self.root.display()), e)
        })?;

        let bytes = serde_json::to_vec(item)
            .map_err(|e| RuntimeError::cache_io(format!("cannot encode payload {key}"), e))?;
        let path = self.path_of(key);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| RuntimeError::cache_io(format!("cannot write {}", path.display()), e))?;

        tracing::trace!(target: TRACING_TARGET, %key, path = %path.display(), "Stored payload");
        Ok(())
    }

    async fn load(&self, key: ReloadKey) -> RuntimeResult<DataItem> {
        let path = self.path_of(key);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| RuntimeError::cache_io(format!("cannot read {}", path.display()), e))?;
        let item = serde_json::from_slice(&bytes)
            .map_err(|e| RuntimeError::cache_io(format!("cannot decode payload {key}"), e))?;

        tracing::trace!(target: TRACING_TARGET, %key, path = %path.display(), "Loaded payload");
        Ok(item)
    }

    async fn remove(&self, key: ReloadKey) -> RuntimeResult<()> {
        let path = self.path_of(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(RuntimeError::cache_io(
                format!("cannot remove {}", path.display()),
                e,
            )),
        }
    }
}
