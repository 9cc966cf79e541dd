//! Cache configuration arguments.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use strata_runtime::cache::{Cache, CacheConfig, FsStorage, MemoryStorage, Storage};

use crate::TRACING_TARGET_CONFIG;

/// Cache options.
#[derive(Debug, Clone, Args)]
pub struct CacheArgs {
    /// Directory for evicted payloads; kept in memory when unset.
    #[arg(long, env = "STRATA_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Rows kept in memory before older cached payloads are evicted.
    #[arg(long, env = "STRATA_MAX_RESIDENT_ROWS")]
    pub max_resident_rows: Option<usize>,
}

impl CacheArgs {
    /// Creates the cache.
    pub fn build(&self) -> Cache {
        let storage: Arc<dyn Storage> = match &self.cache_dir {
            Some(dir) => Arc::new(FsStorage::new(dir.clone())),
            None => Arc::new(MemoryStorage::new()),
        };

        tracing::debug!(
            target: TRACING_TARGET_CONFIG,
            cache_dir = ?self.cache_dir,
            max_resident_rows = ?self.max_resident_rows,
            "Cache configuration"
        );

        Cache::new(
            storage,
            CacheConfig {
                max_resident_rows: self.max_resident_rows,
            },
        )
    }
}
