//! Virtual payload handles.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use derive_more::{Debug as DebugMore, Display};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::DataItem;
use crate::cache::Storage;
use crate::error::RuntimeResult;

/// Key under which an evicted payload is persisted.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(DebugMore, Display)]
#[debug("{_0}")]
#[display("{_0}")]
#[serde(transparent)]
pub struct ReloadKey(Uuid);

impl ReloadKey {
    /// Creates a new unique reload key.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ReloadKey {
    fn default() -> Self {
        Self::new()
    }
}

/// Two-state payload handle.
#[derive(Debug, Clone)]
pub enum PayloadHandle {
    /// Payload is held in memory.
    Resident(Arc<DataItem>),
    /// Payload was written to storage and dropped from memory.
    Evicted(ReloadKey),
}

/// Payload shared by every row and table that references it.
///
/// The payload itself never changes; only its residency does. Eviction
/// persists the payload under [`key`](Self::key) and [`resolve`](Self::resolve)
/// reloads it on demand, so reloading is idempotent.
pub struct VirtualData {
    key: ReloadKey,
    handle: Mutex<PayloadHandle>,
}

impl VirtualData {
    /// Wraps a resident payload.
    pub fn new(item: DataItem) -> Arc<Self> {
        Arc::new(Self {
            key: ReloadKey::new(),
            handle: Mutex::new(PayloadHandle::Resident(Arc::new(item))),
        })
    }

    /// Creates a handle for a payload that only exists in storage.
    pub fn evicted(key: ReloadKey) -> Arc<Self> {
        Arc::new(Self {
            key,
            handle: Mutex::new(PayloadHandle::Evicted(key)),
        })
    }

    /// Returns the storage key of this payload.
    pub fn key(&self) -> ReloadKey {
        self.key
    }

    /// Returns a snapshot of the current handle state.
    pub fn handle(&self) -> PayloadHandle {
        self.lock().clone()
    }

    /// Returns whether the payload is held in memory.
    pub fn is_resident(&self) -> bool {
        matches!(*self.lock(), PayloadHandle::Resident(_))
    }

    /// Returns the payload if it is resident.
    pub fn get(&self) -> Option<Arc<DataItem>> {
        match &*self.lock() {
            PayloadHandle::Resident(item) => Some(item.clone()),
            PayloadHandle::Evicted(_) => None,
        }
    }

    /// Returns the payload, reloading it from storage if it was evicted.
    pub async fn resolve(&self, storage: &dyn Storage) -> RuntimeResult<Arc<DataItem>> {
        if let Some(item) = self.get() {
            return Ok(item);
        }

        let item = Arc::new(storage.load(self.key).await?);
        let mut handle = self.lock();
        if let PayloadHandle::Resident(existing) = &*handle {
            return Ok(existing.clone());
        }
        *handle = PayloadHandle::Resident(item.clone());
        Ok(item)
    }

    /// Persists the payload and drops it from memory.
    ///
    /// Returns `false` if the payload was already evicted.
    pub async fn evict(&self, storage: &dyn Storage) -> RuntimeResult<bool> {
        let Some(item) = self.get() else {
            return Ok(false);
        };

        storage.store(self.key, &item).await?;
        *self.lock() = PayloadHandle::Evicted(self.key);
        Ok(true)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PayloadHandle> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for VirtualData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualData")
            .field("key", &self.key)
            .field("resident", &self.is_resident())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStorage;

    #[tokio::test]
    async fn test_evict_and_resolve() {
        let storage = MemoryStorage::new();
        let data = VirtualData::new(DataItem::new(42));
        assert!(data.is_resident());

        assert!(data.evict(&storage).await.unwrap());
        assert!(!data.is_resident());
        assert!(data.get().is_none());
        assert!(!data.evict(&storage).await.unwrap());

        let item = data.resolve(&storage).await.unwrap();
        assert_eq!(item.value(), &serde_json::json!(42));
        assert!(data.is_resident());
    }

    #[tokio::test]
    async fn test_resolve_missing_payload_fails() {
        let storage = MemoryStorage::new();
        let data = VirtualData::evicted(ReloadKey::new());
        let error = data.resolve(&storage).await.unwrap_err();
        assert_eq!(error.kind(), crate::ErrorKind::CacheIo);
    }
}
