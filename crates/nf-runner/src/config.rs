//! Engine configuration: TOML file plus `NODEFLOW_*` environment overrides.
//!
//! ```toml
//! [sandbox]
//! endpoint = "http://localhost:8080"
//!
//! [breaker]
//! failure_threshold = 5
//! timeout_secs = 60
//!
//! [cache]
//! backend = "sqlite"
//! path = "/var/lib/nodeflow/cache.db"
//!
//! [generator]
//! endpoint = "http://localhost:9000/generate"
//! ```

use nf_cache::EvictionPolicy;
use nf_executor::{CircuitBreakerConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const ENV_PREFIX: &str = "NODEFLOW_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {message}")]
    Read { path: String, message: String },
    #[error("config parse error: {0}")]
    Parse(String),
    #[error("invalid value for {key}: {message}")]
    Env { key: String, message: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sandbox: SandboxConfig,
    pub breaker: BreakerConfig,
    pub cache: CacheConfig,
    pub generator: GeneratorConfig,
    pub trace: TraceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub endpoint: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub timeout_secs: u64,
    pub half_open_max_calls: u32,
    pub trip_on_connection_error: bool,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_secs: 60,
            half_open_max_calls: 1,
            trip_on_connection_error: false,
        }
    }
}

impl BreakerConfig {
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            timeout: Duration::from_secs(self.timeout_secs),
            half_open_max_calls: self.half_open_max_calls,
            trip_on_connection_error: self.trip_on_connection_error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    /// SQLite file; the runtime picks a data-dir default when unset.
    pub path: Option<PathBuf>,
    pub eviction: EvictionPolicy,
    pub semantic: bool,
    pub semantic_threshold: f32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            path: None,
            eviction: EvictionPolicy::default(),
            semantic: false,
            semantic_threshold: nf_cache::semantic::DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Without an endpoint, `cached` nodes have no executor.
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// SQLite trace database; traces are not persisted when unset.
    pub path: Option<PathBuf>,
}

impl EngineConfig {
    /// Load from an optional TOML file, then apply process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `NODEFLOW_*` overrides. Unknown keys are ignored.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "SANDBOX_ENDPOINT" => self.sandbox.endpoint = value,
                "BREAKER_FAILURE_THRESHOLD" => self.breaker.failure_threshold = parse_env(&key, &value)?,
                "BREAKER_TIMEOUT_SECS" => self.breaker.timeout_secs = parse_env(&key, &value)?,
                "BREAKER_HALF_OPEN_MAX_CALLS" => {
                    self.breaker.half_open_max_calls = parse_env(&key, &value)?
                }
                "BREAKER_TRIP_ON_CONNECTION_ERROR" => {
                    self.breaker.trip_on_connection_error = parse_env(&key, &value)?
                }
                "CACHE_BACKEND" => {
                    self.cache.backend = match value.to_lowercase().as_str() {
                        "memory" => CacheBackend::Memory,
                        "sqlite" => CacheBackend::Sqlite,
                        other => {
                            return Err(ConfigError::Env {
                                key,
                                message: format!("unknown cache backend '{other}'"),
                            })
                        }
                    }
                }
                "CACHE_PATH" => self.cache.path = Some(PathBuf::from(value)),
                "CACHE_MIN_REUSE" => {
                    self.cache.eviction.min_reuse_before_eviction = parse_env(&key, &value)?
                }
                "CACHE_UNRELIABILITY_THRESHOLD" => {
                    self.cache.eviction.unreliability_threshold = parse_env(&key, &value)?
                }
                "CACHE_SEMANTIC" => self.cache.semantic = parse_env(&key, &value)?,
                "CACHE_SEMANTIC_THRESHOLD" => self.cache.semantic_threshold = parse_env(&key, &value)?,
                "GENERATOR_ENDPOINT" => self.generator.endpoint = Some(value),
                "GENERATOR_MODEL" => self.generator.model = Some(value),
                "GENERATOR_MAX_ATTEMPTS" => self.generator.retry.max_attempts = parse_env(&key, &value)?,
                "TRACE_PATH" => self.trace.path = Some(PathBuf::from(value)),
                _ => {}
            }
        }
        Ok(())
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if let Err(e) = url::Url::parse(&self.sandbox.endpoint) {
            problems.push(format!("sandbox.endpoint '{}': {e}", self.sandbox.endpoint));
        }
        if let Some(endpoint) = &self.generator.endpoint {
            if let Err(e) = url::Url::parse(endpoint) {
                problems.push(format!("generator.endpoint '{endpoint}': {e}"));
            }
        }
        if self.breaker.failure_threshold == 0 {
            problems.push("breaker.failure_threshold must be at least 1".into());
        }
        if self.breaker.half_open_max_calls == 0 {
            problems.push("breaker.half_open_max_calls must be at least 1".into());
        }
        let threshold = self.cache.eviction.unreliability_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            problems.push(format!("cache.eviction.unreliability_threshold {threshold} not in 0..=1"));
        }
        if !(0.0..=1.0).contains(&self.cache.semantic_threshold) {
            problems.push(format!(
                "cache.semantic_threshold {} not in 0..=1",
                self.cache.semantic_threshold
            ));
        }
        if self.generator.retry.max_attempts == 0 {
            problems.push("generator.retry.max_attempts must be at least 1".into());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems.join("; ")))
        }
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        key: key.to_string(),
        message: e.to_string(),
    })
}
