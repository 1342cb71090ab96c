//! In-process cache store.

use crate::{CacheEntry, CacheError, CacheStats, CodeCacheStore, EvictionPolicy};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Thread-safe cache held in memory; lost on restart.
#[derive(Debug, Default)]
pub struct MemoryCodeCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    policy: EvictionPolicy,
}

impl MemoryCodeCache {
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            policy,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, CacheEntry>>, CacheError> {
        self.entries.lock().map_err(|_| CacheError::LockPoisoned)
    }
}

impl CodeCacheStore for MemoryCodeCache {
    fn lookup(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let mut entries = self.lock()?;
        Ok(entries.get_mut(key).map(|entry| {
            entry.times_reused += 1;
            entry.last_used_at = Some(Utc::now());
            entry.clone()
        }))
    }

    fn peek(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn save(&self, key: &str, payload: &str, model_id: &str, task: &str) -> Result<bool, CacheError> {
        let mut entries = self.lock()?;
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), CacheEntry::new(key, payload, model_id, task));
        tracing::debug!(cache_key = key, model_id, "cached generated code");
        Ok(true)
    }

    fn replace(&self, key: &str, payload: &str, model_id: &str, task: &str) -> Result<(), CacheError> {
        self.lock()?
            .insert(key.to_string(), CacheEntry::new(key, payload, model_id, task));
        tracing::debug!(cache_key = key, model_id, "replaced cached code");
        Ok(())
    }

    fn record_outcome(&self, key: &str, success: bool) -> Result<(), CacheError> {
        let mut entries = self.lock()?;
        if let Some(entry) = entries.get_mut(key) {
            if success {
                entry.success_count += 1;
            } else {
                entry.failure_count += 1;
            }
        }
        Ok(())
    }

    fn maybe_evict(&self, key: &str) -> Result<bool, CacheError> {
        let mut entries = self.lock()?;
        let evict = entries
            .get(key)
            .is_some_and(|entry| self.policy.should_evict(entry));
        if evict {
            if let Some(entry) = entries.remove(key) {
                tracing::warn!(
                    cache_key = key,
                    times_reused = entry.times_reused,
                    failure_ratio = entry.failure_ratio(),
                    "evicted unreliable cache entry"
                );
            }
        }
        Ok(evict)
    }

    fn remove(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.lock()?.remove(key).is_some())
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.lock()?.clear();
        Ok(())
    }

    fn stats(&self) -> Result<CacheStats, CacheError> {
        let entries = self.lock()?;
        Ok(entries.values().fold(
            CacheStats {
                entries: entries.len() as u64,
                ..CacheStats::default()
            },
            |mut stats, e| {
                stats.total_reuses += e.times_reused;
                stats.total_successes += e.success_count;
                stats.total_failures += e.failure_count;
                stats
            },
        ))
    }

    fn policy(&self) -> &EvictionPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn save_is_noop_when_present() {
        let cache = MemoryCodeCache::default();
        assert!(cache.save("k", "v1", "m", "task").unwrap());
        assert!(!cache.save("k", "v2", "m", "task").unwrap());
        assert_eq!(cache.peek("k").unwrap().unwrap().payload, "v1");
    }

    #[test]
    fn replace_overwrites_code_and_history() {
        let cache = MemoryCodeCache::default();
        cache.save("k", "broken()", "m1", "task").unwrap();
        cache.lookup("k").unwrap();
        cache.record_outcome("k", false).unwrap();

        cache.replace("k", "fixed()", "m2", "task").unwrap();
        let entry = cache.peek("k").unwrap().unwrap();
        assert_eq!(entry.payload, "fixed()");
        assert_eq!(entry.model_id, "m2");
        assert_eq!((entry.times_reused, entry.failure_count), (0, 0));
        assert_eq!(cache.stats().unwrap().entries, 1);
    }

    #[test]
    fn lookup_counts_reuse_and_peek_does_not() {
        let cache = MemoryCodeCache::default();
        assert!(cache.lookup("missing").unwrap().is_none());

        cache.save("k", "code", "m", "task").unwrap();
        cache.lookup("k").unwrap();
        let hit = cache.lookup("k").unwrap().unwrap();
        assert_eq!(hit.times_reused, 2);
        assert!(hit.last_used_at.is_some());
        assert_eq!(cache.peek("k").unwrap().unwrap().times_reused, 2);
    }

    #[test]
    fn unreliable_entry_is_evicted_after_min_reuse() {
        let cache = MemoryCodeCache::new(EvictionPolicy::default());
        cache.save("k", "code", "m", "task").unwrap();

        for round in 1..=3 {
            cache.lookup("k").unwrap();
            cache.record_outcome("k", round == 1).unwrap();
            let evicted = cache.maybe_evict("k").unwrap();
            // Rounds 1-2 are below the reuse minimum; round 3 has 2/3 failures.
            assert_eq!(evicted, round == 3, "round {round}");
        }
        assert!(cache.peek("k").unwrap().is_none());
    }

    #[test]
    fn concurrent_hits_are_not_lost() {
        let cache = Arc::new(MemoryCodeCache::default());
        cache.save("k", "code", "m", "task").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for _ in 0..100 {
                        cache.lookup("k").unwrap();
                        cache.record_outcome("k", true).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let stats = cache.stats().unwrap();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.total_reuses, 800);
        assert_eq!(stats.total_successes, 800);
    }
}
