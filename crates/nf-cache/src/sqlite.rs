//! SQLite-backed cache store, shared across processes and restarts.

use crate::{CacheEntry, CacheError, CacheStats, CodeCacheStore, EvictionPolicy};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS code_cache (
        cache_key TEXT PRIMARY KEY,
        payload TEXT NOT NULL,
        model_id TEXT NOT NULL,
        original_task TEXT NOT NULL,
        created_at TEXT NOT NULL,
        last_used_at TEXT,
        times_reused INTEGER NOT NULL DEFAULT 0,
        success_count INTEGER NOT NULL DEFAULT 0,
        failure_count INTEGER NOT NULL DEFAULT 0
    );";

const SELECT_ENTRY: &str = "SELECT cache_key, payload, model_id, original_task, created_at,
            last_used_at, times_reused, success_count, failure_count
     FROM code_cache WHERE cache_key = ?1";

/// Thread-safe cache backed by SQLite.
/// Uses Mutex<Connection> for thread safety (rusqlite::Connection is !Sync).
pub struct SqliteCodeCache {
    conn: Mutex<Connection>,
    policy: EvictionPolicy,
}

impl SqliteCodeCache {
    /// Open (or create) the cache database at the given path.
    pub fn open(db_path: &Path, policy: EvictionPolicy) -> Result<Self, CacheError> {
        let conn = Connection::open(db_path)
            .map_err(|e| CacheError::Database(format!("Failed to open cache DB: {e}")))?;
        Self::with_connection(conn, policy)
    }

    /// Create an in-memory cache (for testing).
    pub fn in_memory(policy: EvictionPolicy) -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CacheError::Database(format!("Failed to open in-memory DB: {e}")))?;
        Self::with_connection(conn, policy)
    }

    fn with_connection(conn: Connection, policy: EvictionPolicy) -> Result<Self, CacheError> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| CacheError::Database(format!("Failed to create cache table: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
            policy,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
        self.conn.lock().map_err(|_| CacheError::LockPoisoned)
    }
}

fn select_entry(conn: &Connection, key: &str) -> Result<Option<CacheEntry>, CacheError> {
    let raw = conn
        .query_row(SELECT_ENTRY, params![key], RawEntryRow::from_row)
        .optional()?;
    raw.map(RawEntryRow::into_entry).transpose()
}

impl CodeCacheStore for SqliteCodeCache {
    fn lookup(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let conn = self.lock()?;
        // Increment in SQL so concurrent processes never lose a hit.
        let touched = conn.execute(
            "UPDATE code_cache SET times_reused = times_reused + 1, last_used_at = ?1
             WHERE cache_key = ?2",
            params![Utc::now().to_rfc3339(), key],
        )?;
        if touched == 0 {
            return Ok(None);
        }
        select_entry(&conn, key)
    }

    fn peek(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let conn = self.lock()?;
        select_entry(&conn, key)
    }

    fn save(&self, key: &str, payload: &str, model_id: &str, task: &str) -> Result<bool, CacheError> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO code_cache (cache_key, payload, model_id, original_task, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![key, payload, model_id, task, Utc::now().to_rfc3339()],
        )?;
        Ok(inserted == 1)
    }

    fn replace(&self, key: &str, payload: &str, model_id: &str, task: &str) -> Result<(), CacheError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO code_cache (cache_key, payload, model_id, original_task, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![key, payload, model_id, task, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn record_outcome(&self, key: &str, success: bool) -> Result<(), CacheError> {
        let conn = self.lock()?;
        let sql = if success {
            "UPDATE code_cache SET success_count = success_count + 1 WHERE cache_key = ?1"
        } else {
            "UPDATE code_cache SET failure_count = failure_count + 1 WHERE cache_key = ?1"
        };
        conn.execute(sql, params![key])?;
        Ok(())
    }

    fn maybe_evict(&self, key: &str) -> Result<bool, CacheError> {
        let conn = self.lock()?;
        let Some(entry) = select_entry(&conn, key)? else {
            return Ok(false);
        };
        if !self.policy.should_evict(&entry) {
            return Ok(false);
        }
        conn.execute("DELETE FROM code_cache WHERE cache_key = ?1", params![key])?;
        tracing::warn!(
            cache_key = key,
            times_reused = entry.times_reused,
            failure_ratio = entry.failure_ratio(),
            "evicted unreliable cache entry"
        );
        Ok(true)
    }

    fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let conn = self.lock()?;
        Ok(conn.execute("DELETE FROM code_cache WHERE cache_key = ?1", params![key])? > 0)
    }

    fn clear(&self) -> Result<(), CacheError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM code_cache", [])?;
        Ok(())
    }

    fn stats(&self) -> Result<CacheStats, CacheError> {
        let conn = self.lock()?;
        let stats = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(times_reused), 0),
                    COALESCE(SUM(success_count), 0), COALESCE(SUM(failure_count), 0)
             FROM code_cache",
            [],
            |row| {
                Ok(CacheStats {
                    entries: row.get::<_, i64>(0)? as u64,
                    total_reuses: row.get::<_, i64>(1)? as u64,
                    total_successes: row.get::<_, i64>(2)? as u64,
                    total_failures: row.get::<_, i64>(3)? as u64,
                })
            },
        )?;
        Ok(stats)
    }

    fn policy(&self) -> &EvictionPolicy {
        &self.policy
    }
}

/// Internal row struct for SQLite queries.
struct RawEntryRow {
    key: String,
    payload: String,
    model_id: String,
    original_task: String,
    created_at: String,
    last_used_at: Option<String>,
    times_reused: i64,
    success_count: i64,
    failure_count: i64,
}

impl RawEntryRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            payload: row.get(1)?,
            model_id: row.get(2)?,
            original_task: row.get(3)?,
            created_at: row.get(4)?,
            last_used_at: row.get(5)?,
            times_reused: row.get(6)?,
            success_count: row.get(7)?,
            failure_count: row.get(8)?,
        })
    }

    fn into_entry(self) -> Result<CacheEntry, CacheError> {
        let parse_time = |field: &str, raw: &str| {
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| CacheError::Corrupt {
                    key: self.key.clone(),
                    message: format!("{field}: {e}"),
                })
        };

        let created_at = parse_time("created_at", &self.created_at)?;
        let last_used_at = self
            .last_used_at
            .as_deref()
            .map(|raw| parse_time("last_used_at", raw))
            .transpose()?;

        Ok(CacheEntry {
            created_at,
            last_used_at,
            times_reused: self.times_reused.max(0) as u64,
            success_count: self.success_count.max(0) as u64,
            failure_count: self.failure_count.max(0) as u64,
            key: self.key,
            payload: self.payload,
            model_id: self.model_id,
            original_task: self.original_task,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_cache_roundtrip() {
        let cache = SqliteCodeCache::in_memory(EvictionPolicy::default()).unwrap();

        // Initially empty
        assert!(cache.lookup("k").unwrap().is_none());

        assert!(cache.save("k", "result = 42", "model-a", "Answer").unwrap());
        assert!(!cache.save("k", "other", "model-b", "Answer").unwrap());

        let hit = cache.lookup("k").unwrap().unwrap();
        assert_eq!(hit.payload, "result = 42");
        assert_eq!(hit.model_id, "model-a");
        assert_eq!(hit.times_reused, 1);
        assert!(hit.last_used_at.is_some());
    }

    #[test]
    fn outcomes_and_eviction() {
        let cache = SqliteCodeCache::in_memory(EvictionPolicy {
            min_reuse_before_eviction: 2,
            unreliability_threshold: 0.5,
        })
        .unwrap();
        cache.save("k", "code", "m", "task").unwrap();

        cache.lookup("k").unwrap();
        cache.record_outcome("k", false).unwrap();
        assert!(!cache.maybe_evict("k").unwrap());

        cache.lookup("k").unwrap();
        cache.record_outcome("k", true).unwrap();
        assert!(cache.maybe_evict("k").unwrap());
        assert!(cache.peek("k").unwrap().is_none());
    }

    #[test]
    fn replace_resets_counters() {
        let cache = SqliteCodeCache::in_memory(EvictionPolicy::default()).unwrap();
        cache.save("k", "broken()", "m1", "t").unwrap();
        cache.lookup("k").unwrap();
        cache.record_outcome("k", false).unwrap();

        cache.replace("k", "fixed()", "m2", "t").unwrap();
        let entry = cache.peek("k").unwrap().unwrap();
        assert_eq!(entry.payload, "fixed()");
        assert_eq!(entry.times_reused, 0);
        assert_eq!(entry.failure_count, 0);
        assert_eq!(cache.stats().unwrap().entries, 1);
    }

    #[test]
    fn stats_and_clear() {
        let cache = SqliteCodeCache::in_memory(EvictionPolicy::default()).unwrap();
        assert_eq!(cache.stats().unwrap(), CacheStats::default());

        cache.save("a", "1", "m", "t").unwrap();
        cache.save("b", "2", "m", "t").unwrap();
        cache.lookup("a").unwrap();
        cache.record_outcome("a", true).unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.total_reuses, 1);
        assert_eq!(stats.total_successes, 1);

        assert!(cache.remove("b").unwrap());
        cache.clear().unwrap();
        assert_eq!(cache.stats().unwrap().entries, 0);
    }
}
