//! Result caching.
//!
//! Successful node results are cached under a [`CacheKey`] built from the
//! node's [`Fingerprint`] and the provenance of everything upstream:
//! - [`Cache`]: Content-addressed entries with an optional resident budget
//! - [`Storage`]: Where evicted payloads go ([`MemoryStorage`], [`FsStorage`])

mod cache;
mod fingerprint;
mod storage;

pub use cache::{Cache, CacheConfig, CacheEntry, CacheKey, CacheStats};
pub use fingerprint::{Fingerprint, FingerprintHasher};
pub use storage::{FsStorage, MemoryStorage, Storage};
