//! nf-cache: Content-addressed code cache.
//!
//! Generated code is stored under `SHA256(normalize(task) :: SHA256(context))`
//! and evicted once its replay history shows it to be unreliable.

pub mod entry;
pub mod key;
pub mod memory;
pub mod policy;
pub mod semantic;
pub mod sqlite;

pub use entry::CacheEntry;
pub use key::{compute_cache_key, context_digest, normalize_task};
pub use memory::MemoryCodeCache;
pub use policy::EvictionPolicy;
pub use semantic::{Embedder, HashingEmbedder, SemanticCodeCache, SemanticMatch};
pub use sqlite::SqliteCodeCache;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache database error: {0}")]
    Database(String),
    #[error("cache lock poisoned")]
    LockPoisoned,
    #[error("corrupt cache entry {key}: {message}")]
    Corrupt { key: String, message: String },
}

impl From<rusqlite::Error> for CacheError {
    fn from(e: rusqlite::Error) -> Self {
        CacheError::Database(e.to_string())
    }
}

/// Aggregate counters across every entry in a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: u64,
    pub total_reuses: u64,
    pub total_successes: u64,
    pub total_failures: u64,
}

/// Storage contract shared by every exact-match cache backend.
///
/// Implementations guard their state with a single lock so counter updates
/// from concurrent runs are never lost.
pub trait CodeCacheStore: Send + Sync {
    /// Fetch an entry, counting the hit as a reuse.
    fn lookup(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Fetch an entry without touching its counters.
    fn peek(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Store freshly generated code. Returns `false` (and changes nothing)
    /// when the key is already present.
    fn save(&self, key: &str, payload: &str, model_id: &str, task: &str)
        -> Result<bool, CacheError>;

    /// Overwrite whatever is stored under `key` with new code and a fresh
    /// history. Used when cached code failed and a regeneration succeeded.
    fn replace(&self, key: &str, payload: &str, model_id: &str, task: &str)
        -> Result<(), CacheError>;

    /// Count one replay outcome against the entry.
    fn record_outcome(&self, key: &str, success: bool) -> Result<(), CacheError>;

    /// Delete the entry if the eviction policy deems it unreliable.
    fn maybe_evict(&self, key: &str) -> Result<bool, CacheError>;

    fn remove(&self, key: &str) -> Result<bool, CacheError>;

    fn clear(&self) -> Result<(), CacheError>;

    fn stats(&self) -> Result<CacheStats, CacheError>;

    fn policy(&self) -> &EvictionPolicy;
}
