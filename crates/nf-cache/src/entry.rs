//! Cache entry: one piece of generated code and its replay history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    /// The generated, executable code.
    pub payload: String,
    pub model_id: String,
    pub original_task: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
    /// Incremented on every lookup hit, whatever the replay outcome.
    pub times_reused: u64,
    pub success_count: u64,
    pub failure_count: u64,
}

impl CacheEntry {
    pub fn new(key: &str, payload: &str, model_id: &str, task: &str) -> Self {
        Self {
            key: key.to_string(),
            payload: payload.to_string(),
            model_id: model_id.to_string(),
            original_task: task.to_string(),
            created_at: Utc::now(),
            last_used_at: None,
            times_reused: 0,
            success_count: 0,
            failure_count: 0,
        }
    }

    pub fn outcomes(&self) -> u64 {
        self.success_count + self.failure_count
    }

    /// Fraction of recorded replays that failed; 0 when nothing was recorded.
    pub fn failure_ratio(&self) -> f64 {
        match self.outcomes() {
            0 => 0.0,
            total => self.failure_count as f64 / total as f64,
        }
    }
}
