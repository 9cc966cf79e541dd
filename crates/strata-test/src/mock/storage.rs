//! Mock payload storage for testing.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use strata_runtime::cache::{MemoryStorage, Storage};
use strata_runtime::table::{DataItem, ReloadKey};
use strata_runtime::{RuntimeError, RuntimeResult};

/// In-memory storage whose loads can be switched to fail.
#[derive(Debug, Default)]
pub struct FlakyStorage {
    inner: MemoryStorage,
    fail_loads: AtomicBool,
}

impl FlakyStorage {
    /// Creates a storage that works until told otherwise.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent load fail, or work again.
    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn store(&self, key: ReloadKey, item: &DataItem) -> RuntimeResult<()> {
        self.inner.store(key, item).await
    }

    async fn load(&self, key: ReloadKey) -> RuntimeResult<DataItem> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(RuntimeError::CacheIo {
                message: format!("payload {key} is unavailable"),
                source: None,
            });
        }
        self.inner.load(key).await
    }

    async fn remove(&self, key: ReloadKey) -> RuntimeResult<()> {
        self.inner.remove(key).await
    }
}
