//! Eviction policy for unreliable cache entries.
//!
//! The defaults (3 reuses, 30% failures) are heuristics pending product
//! validation, which is why both knobs are configuration.

use crate::CacheEntry;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionPolicy {
    /// Reuses required before an entry's history is trusted.
    pub min_reuse_before_eviction: u64,
    /// Failure ratio at or above which an entry is dropped.
    pub unreliability_threshold: f64,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            min_reuse_before_eviction: 3,
            unreliability_threshold: 0.3,
        }
    }
}

impl EvictionPolicy {
    pub fn should_evict(&self, entry: &CacheEntry) -> bool {
        entry.times_reused >= self.min_reuse_before_eviction
            && entry.outcomes() > 0
            && entry.failure_ratio() >= self.unreliability_threshold
    }
}
