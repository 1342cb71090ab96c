//! Similarity-based cache variant.
//!
//! Entries are matched on an embedding of the normalized task plus the shape
//! of the functional context (key names and value types), so the same task
//! over structurally identical data can reuse code even when values differ.
//! A match is only offered when every context key the cached code reads is
//! present in the caller's context.

use crate::{normalize_task, CacheEntry, CacheError, EvictionPolicy};
use chrono::Utc;
use nf_core::context::{functional_entries, type_name, ContextMap};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, OnceLock};

/// Default minimum cosine similarity for a semantic hit.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.92;

/// Records kept before the least recently used one is dropped.
pub const DEFAULT_MAX_RECORDS: usize = 1024;

/// Turns a text description into a dense vector.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Bag-of-words embedder: each token is hashed into one of `dimensions`
/// buckets, then the vector is L2-normalized.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let index = (u64::from_be_bytes(bucket) % self.dimensions as u64) as usize;
            vector[index] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

/// Cosine similarity; 0 for mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Text that gets embedded: the normalized task followed by the sorted
/// functional keys with their value types.
pub fn describe(task: &str, context: &ContextMap) -> String {
    let functional = functional_entries(context);
    let mut shape: Vec<String> = functional
        .iter()
        .map(|(k, v)| format!("{k}:{}", type_name(v)))
        .collect();
    shape.sort();
    format!("{} | {}", normalize_task(task), shape.join(" "))
}

fn context_key_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r#"context\s*(?:\[\s*|\.get\(\s*)["']([A-Za-z_][A-Za-z0-9_]*)["']"#).ok()
        })
        .as_ref()
}

/// Context keys a payload reads via `context["k"]` or `context.get("k")`.
pub fn referenced_keys(code: &str) -> BTreeSet<String> {
    context_key_pattern()
        .map(|re| {
            re.captures_iter(code)
                .map(|c| c[1].to_string())
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
struct SemanticRecord {
    entry: CacheEntry,
    description: String,
    embedding: Vec<f32>,
    required_keys: BTreeSet<String>,
}

/// A semantic hit and how close it was.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticMatch {
    pub entry: CacheEntry,
    pub similarity: f32,
}

pub struct SemanticCodeCache {
    embedder: Box<dyn Embedder>,
    threshold: f32,
    policy: EvictionPolicy,
    max_records: usize,
    records: Mutex<Vec<SemanticRecord>>,
}

impl SemanticCodeCache {
    pub fn new(embedder: Box<dyn Embedder>, threshold: f32, policy: EvictionPolicy) -> Self {
        Self {
            embedder,
            threshold,
            policy,
            max_records: DEFAULT_MAX_RECORDS,
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records.max(1);
        self
    }

    /// Hashing embedder with the default threshold.
    pub fn with_defaults(policy: EvictionPolicy) -> Self {
        Self::new(
            Box::new(HashingEmbedder::default()),
            DEFAULT_SIMILARITY_THRESHOLD,
            policy,
        )
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<SemanticRecord>>, CacheError> {
        self.records.lock().map_err(|_| CacheError::LockPoisoned)
    }

    /// Index generated code. A record with the same key or the same
    /// description is replaced, so regenerated code supersedes the code it
    /// was generated to fix. Returns `true` when nothing was replaced.
    pub fn save(
        &self,
        key: &str,
        payload: &str,
        model_id: &str,
        task: &str,
        context: &ContextMap,
    ) -> Result<bool, CacheError> {
        let description = describe(task, context);
        let embedding = self.embedder.embed(&description);
        let mut records = self.lock()?;

        let before = records.len();
        records.retain(|r| r.entry.key != key && r.description != description);
        let replaced = records.len() < before;

        if records.len() >= self.max_records {
            if let Some(oldest) = records
                .iter()
                .enumerate()
                .min_by_key(|(_, r)| r.entry.last_used_at.unwrap_or(r.entry.created_at))
                .map(|(i, _)| i)
            {
                let dropped = records.remove(oldest);
                tracing::debug!(cache_key = %dropped.entry.key, "semantic cache full, dropped oldest record");
            }
        }

        records.push(SemanticRecord {
            entry: CacheEntry::new(key, payload, model_id, task),
            description,
            embedding,
            required_keys: referenced_keys(payload),
        });
        if replaced {
            tracing::debug!(cache_key = key, "replaced semantic cache record");
        }
        Ok(!replaced)
    }

    /// Best entry at or above the threshold whose required keys are all
    /// present in `context`. A hit counts as a reuse.
    pub fn lookup(&self, task: &str, context: &ContextMap) -> Result<Option<SemanticMatch>, CacheError> {
        let query = self.embedder.embed(&describe(task, context));
        let mut records = self.lock()?;

        let best = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.required_keys.iter().all(|k| context.contains_key(k)))
            .map(|(i, r)| (i, cosine_similarity(&query, &r.embedding)))
            .filter(|(_, sim)| *sim >= self.threshold)
            .max_by(|a, b| a.1.total_cmp(&b.1));

        let Some((index, similarity)) = best else {
            return Ok(None);
        };
        let record = &mut records[index];
        record.entry.times_reused += 1;
        record.entry.last_used_at = Some(Utc::now());
        tracing::debug!(
            cache_key = %record.entry.key,
            similarity,
            "semantic cache hit"
        );
        Ok(Some(SemanticMatch {
            entry: record.entry.clone(),
            similarity,
        }))
    }

    pub fn record_outcome(&self, key: &str, success: bool) -> Result<(), CacheError> {
        let mut records = self.lock()?;
        if let Some(record) = records.iter_mut().find(|r| r.entry.key == key) {
            if success {
                record.entry.success_count += 1;
            } else {
                record.entry.failure_count += 1;
            }
        }
        Ok(())
    }

    pub fn maybe_evict(&self, key: &str) -> Result<bool, CacheError> {
        let mut records = self.lock()?;
        let Some(index) = records
            .iter()
            .position(|r| r.entry.key == key && self.policy.should_evict(&r.entry))
        else {
            return Ok(false);
        };
        let removed = records.remove(index);
        tracing::warn!(
            cache_key = key,
            times_reused = removed.entry.times_reused,
            failure_ratio = removed.entry.failure_ratio(),
            "evicted unreliable semantic cache entry"
        );
        Ok(true)
    }

    pub fn clear(&self) -> Result<(), CacheError> {
        self.lock()?.clear();
        Ok(())
    }

    pub fn len(&self) -> Result<usize, CacheError> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.lock()?.is_empty())
    }
}

impl std::fmt::Debug for SemanticCodeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticCodeCache")
            .field("threshold", &self.threshold)
            .field("policy", &self.policy)
            .field("max_records", &self.max_records)
            .finish_non_exhaustive()
    }
}
