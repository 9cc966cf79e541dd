//! Result cache keyed by node fingerprint and provenance.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use super::{Fingerprint, MemoryStorage, Storage};
use crate::error::RuntimeResult;
use crate::graph::NodeId;
use crate::table::DataTable;

/// Tracing target for cache operations.
const TRACING_TARGET: &str = "strata_runtime::cache";

/// Identifies one cached node result.
///
/// `fingerprint` covers the node's own configuration and `provenance`
/// additionally covers everything upstream of it, so a change anywhere
/// upstream produces a different key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Node that produced the result.
    pub node_id: NodeId,
    /// Fingerprint of the node configuration.
    pub fingerprint: Fingerprint,
    /// Hash over the fingerprint and all upstream provenance.
    pub provenance: Fingerprint,
}

/// Output tables of a successful node execution.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    key: CacheKey,
    outputs: BTreeMap<String, DataTable>,
    created_at: Timestamp,
}

impl CacheEntry {
    /// Returns the cache key.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Returns the output tables by slot name.
    pub fn outputs(&self) -> &BTreeMap<String, DataTable> {
        &self.outputs
    }

    /// Returns the table of one output slot.
    pub fn output(&self, slot: &str) -> Option<&DataTable> {
        self.outputs.get(slot)
    }

    /// Returns when the entry was stored.
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Returns the total number of rows across all outputs.
    pub fn row_count(&self) -> usize {
        self.outputs.values().map(DataTable::len).sum()
    }

    /// Returns the number of rows whose payload is resident.
    pub fn resident_rows(&self) -> usize {
        self.outputs.values().map(DataTable::resident_rows).sum()
    }
}

/// Cache configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Resident row budget; older entries are evicted to storage beyond it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_resident_rows: Option<usize>,
}

impl CacheConfig {
    /// Sets the resident row budget.
    #[must_use]
    pub fn with_max_resident_rows(mut self, rows: usize) -> Self {
        self.max_resident_rows = Some(rows);
        self
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of entries.
    pub entries: usize,
    /// Total rows across all entries.
    pub rows: usize,
    /// Rows whose payload is held in memory.
    pub resident_rows: usize,
    /// Successful lookups.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<CacheKey, Arc<CacheEntry>>,
    // Insertion order, oldest first.
    order: Vec<CacheKey>,
}

/// Content-addressed store of node results.
///
/// Entries are immutable. Storing under an existing key keeps the first
/// entry until it is [removed](Self::remove), and entries for older
/// fingerprints of a node stay until they are cleared explicitly. Payloads
/// of cached rows may be evicted to the backing [`Storage`] and are
/// reloaded transparently by [`lookup`](Self::lookup).
pub struct Cache {
    storage: Arc<dyn Storage>,
    config: CacheConfig,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Cache {
    /// Creates a cache over the given payload storage.
    pub fn new(storage: Arc<dyn Storage>, config: CacheConfig) -> Self {
        Self {
            storage,
            config,
            state: Mutex::new(CacheState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates an unbounded cache backed by [`MemoryStorage`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()), CacheConfig::default())
    }

    /// Returns the payload storage.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Looks up an entry, reloading evicted payloads.
    ///
    /// Returns [`CacheIo`](crate::RuntimeError::CacheIo) if a payload cannot
    /// be reloaded; the caller recomputes the node in that case.
    pub async fn lookup(&self, key: &CacheKey) -> RuntimeResult<Option<Arc<CacheEntry>>> {
        let entry = self.lock().entries.get(key).cloned();
        let Some(entry) = entry else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(target: TRACING_TARGET, node_id = %key.node_id, "Cache miss");
            return Ok(None);
        };

        for table in entry.outputs.values() {
            table.resolve_all(self.storage.as_ref()).await?;
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            target: TRACING_TARGET,
            node_id = %key.node_id,
            provenance = %key.provenance,
            "Cache hit"
        );
        Ok(Some(entry))
    }

    /// Returns whether an entry exists, without reloading anything.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Removes one entry, returning it if it existed.
    ///
    /// Storing under the key afterwards creates a fresh entry.
    pub fn remove(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        let mut state = self.lock();
        let removed = state.entries.remove(key)?;
        state.order.retain(|other| other != key);
        tracing::debug!(target: TRACING_TARGET, node_id = %key.node_id, "Removed cache entry");
        Some(removed)
    }

    /// Stores node outputs under a key.
    ///
    /// If an entry already exists for the key, it is kept and returned.
    pub async fn store(
        &self,
        key: CacheKey,
        outputs: BTreeMap<String, DataTable>,
    ) -> Arc<CacheEntry> {
        let entry = {
            let mut state = self.lock();
            if let Some(existing) = state.entries.get(&key) {
                tracing::debug!(
                    target: TRACING_TARGET,
                    node_id = %key.node_id,
                    "Cache entry already present, keeping first"
                );
                return existing.clone();
            }

            let entry = Arc::new(CacheEntry {
                key,
                outputs,
                created_at: Timestamp::now(),
            });
            state.entries.insert(key, entry.clone());
            state.order.push(key);
            entry
        };

        tracing::debug!(
            target: TRACING_TARGET,
            node_id = %key.node_id,
            rows = entry.row_count(),
            "Stored cache entry"
        );

        if let Some(budget) = self.config.max_resident_rows {
            self.enforce_budget(budget).await;
        }
        entry
    }

    async fn enforce_budget(&self, budget: usize) {
        let entries: Vec<Arc<CacheEntry>> = {
            let state = self.lock();
            state
                .order
                .iter()
                .filter_map(|key| state.entries.get(key).cloned())
                .collect()
        };

        let mut resident: usize = entries.iter().map(|entry| entry.resident_rows()).sum();
        for entry in entries {
            if resident <= budget {
                break;
            }
            match self.evict_entry(&entry).await {
                Ok(evicted) => resident = resident.saturating_sub(evicted),
                Err(error) => {
                    tracing::warn!(
                        target: TRACING_TARGET,
                        node_id = %entry.key.node_id,
                        error = %error,
                        "Failed to evict cache entry"
                    );
                }
            }
        }
    }

    async fn evict_entry(&self, entry: &CacheEntry) -> RuntimeResult<usize> {
        let mut evicted = 0;
        for table in entry.outputs.values() {
            evicted += table.evict_all(self.storage.as_ref()).await?;
        }
        if evicted > 0 {
            tracing::debug!(
                target: TRACING_TARGET,
                node_id = %entry.key.node_id,
                evicted,
                "Evicted cache payloads"
            );
        }
        Ok(evicted)
    }

    /// Evicts the payloads of one entry to storage.
    ///
    /// Returns the number of payloads evicted, zero if the key is unknown.
    pub async fn evict_payloads(&self, key: &CacheKey) -> RuntimeResult<usize> {
        let entry = self.lock().entries.get(key).cloned();
        match entry {
            Some(entry) => self.evict_entry(&entry).await,
            None => Ok(0),
        }
    }

    /// Returns all entries of a node, oldest first.
    pub fn entries_for(&self, node_id: NodeId) -> Vec<Arc<CacheEntry>> {
        let state = self.lock();
        state
            .order
            .iter()
            .filter(|key| key.node_id == node_id)
            .filter_map(|key| state.entries.get(key).cloned())
            .collect()
    }

    /// Removes every entry of a node, returning how many were removed.
    pub fn clear_node(&self, node_id: NodeId) -> usize {
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|key, _| key.node_id != node_id);
        state.order.retain(|key| key.node_id != node_id);
        before - state.entries.len()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.order.clear();
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns whether the cache has no entries.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Returns a snapshot of the cache counters.
    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.entries.len(),
            rows: state.entries.values().map(|entry| entry.row_count()).sum(),
            resident_rows: state.entries.values().map(|entry| entry.resident_rows()).sum(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FingerprintHasher;
    use crate::graph::DataKind;
    use crate::table::{AnnotationSet, DataItem};

    fn fingerprint(seed: &str) -> Fingerprint {
        let mut hasher = FingerprintHasher::new();
        hasher.update(seed.as_bytes());
        hasher.finish()
    }

    fn key(node_id: NodeId, seed: &str) -> CacheKey {
        CacheKey {
            node_id,
            fingerprint: fingerprint(seed),
            provenance: fingerprint(&format!("{seed}/provenance")),
        }
    }

    fn outputs(values: &[i64]) -> BTreeMap<String, DataTable> {
        let mut builder = DataTable::builder(DataKind::new("number"));
        for value in values {
            builder.push_item(DataItem::new(*value), AnnotationSet::new());
        }
        BTreeMap::from([("out".to_owned(), builder.build())])
    }

    #[tokio::test]
    async fn test_first_writer_wins() {
        let cache = Cache::in_memory();
        let key = key(NodeId::new(), "a");

        cache.store(key, outputs(&[1])).await;
        let entry = cache.store(key, outputs(&[2, 3])).await;
        assert_eq!(entry.row_count(), 1);
        assert_eq!(cache.len(), 1);

        let found = cache.lookup(&key).await.unwrap().unwrap();
        assert_eq!(found.output("out").unwrap().len(), 1);
        assert!(cache
            .lookup(&CacheKey { provenance: fingerprint("other"), ..key })
            .await
            .unwrap()
            .is_none());

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn test_removed_entry_can_be_replaced() {
        let cache = Cache::in_memory();
        let key = key(NodeId::new(), "a");
        cache.store(key, outputs(&[1])).await;

        assert!(cache.remove(&key).is_some());
        assert!(cache.remove(&key).is_none());
        assert!(cache.entries_for(key.node_id).is_empty());

        let entry = cache.store(key, outputs(&[2, 3])).await;
        assert_eq!(entry.row_count(), 2);
        assert_eq!(cache.entries_for(key.node_id).len(), 1);
    }

    #[tokio::test]
    async fn test_old_fingerprints_are_kept() {
        let cache = Cache::in_memory();
        let node_id = NodeId::new();
        cache.store(key(node_id, "v1"), outputs(&[1])).await;
        cache.store(key(node_id, "v2"), outputs(&[2])).await;
        cache.store(key(NodeId::new(), "v1"), outputs(&[3])).await;

        assert_eq!(cache.entries_for(node_id).len(), 2);
        assert_eq!(cache.clear_node(node_id), 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_budget_evicts_oldest_and_lookup_reloads() {
        let cache = Cache::new(
            Arc::new(MemoryStorage::new()),
            CacheConfig::default().with_max_resident_rows(3),
        );
        let old = key(NodeId::new(), "old");
        let new = key(NodeId::new(), "new");
        cache.store(old, outputs(&[1, 2])).await;
        cache.store(new, outputs(&[3, 4])).await;

        let stats = cache.stats();
        assert_eq!(stats.rows, 4);
        assert_eq!(stats.resident_rows, 2);
        assert_eq!(cache.entries_for(old.node_id)[0].resident_rows(), 0);

        let entry = cache.lookup(&old).await.unwrap().unwrap();
        assert_eq!(entry.resident_rows(), 2);
        let first = entry.output("out").unwrap().rows()[0].item().unwrap();
        assert_eq!(first.value(), &serde_json::json!(1));
    }

    #[tokio::test]
    async fn test_explicit_eviction() {
        let cache = Cache::in_memory();
        let key = key(NodeId::new(), "a");
        cache.store(key, outputs(&[1, 2, 3])).await;

        assert_eq!(cache.evict_payloads(&key).await.unwrap(), 3);
        assert_eq!(cache.stats().resident_rows, 0);
        assert_eq!(cache.evict_payloads(&key).await.unwrap(), 0);
    }
}
