//! Wire breaker, cache, executors and trace store from an [`EngineConfig`].

use crate::config::{CacheBackend, CacheConfig, EngineConfig};
use crate::engine::GraphEngine;
use crate::registry::ExecutorRegistry;
use anyhow::{bail, Context};
use nf_cache::{CodeCacheStore, HashingEmbedder, MemoryCodeCache, SemanticCodeCache, SqliteCodeCache};
use nf_core::graph::ExecutorKind;
use nf_executor::{
    CachedGenerationExecutor, CircuitBreaker, DirectSandboxExecutor, Executor, HttpCodeGenerator,
    HttpSandboxClient,
};
use nf_trace::TraceStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything a process needs to run workflows. Breaker and cache are shared
/// by every run driven through `engine`.
pub struct Runtime {
    pub engine: GraphEngine,
    pub cache: Arc<dyn CodeCacheStore>,
    pub breaker: Arc<CircuitBreaker>,
    pub traces: Option<Arc<TraceStore>>,
}

impl Runtime {
    /// `data_dir` supplies default file locations for the SQLite stores.
    pub fn from_config(config: &EngineConfig, data_dir: Option<&Path>) -> anyhow::Result<Self> {
        config.validate()?;

        let breaker = Arc::new(CircuitBreaker::new(
            "sandbox",
            config.breaker.to_breaker_config(),
        ));
        let sandbox = Arc::new(HttpSandboxClient::new(&config.sandbox.endpoint)?);
        let direct: Arc<dyn Executor> = Arc::new(DirectSandboxExecutor::new(sandbox, breaker.clone()));
        let cache = open_cache(&config.cache, data_dir)?;

        let mut registry = ExecutorRegistry::new().with(ExecutorKind::Direct, direct.clone());
        match &config.generator.endpoint {
            Some(endpoint) => {
                let generator = Arc::new(HttpCodeGenerator::new(endpoint, config.generator.model.clone())?);
                let mut cached = CachedGenerationExecutor::new(cache.clone(), generator, direct)
                    .with_retry_policy(config.generator.retry.clone());
                if config.cache.semantic {
                    cached = cached.with_semantic_cache(Arc::new(SemanticCodeCache::new(
                        Box::new(HashingEmbedder::default()),
                        config.cache.semantic_threshold,
                        config.cache.eviction.clone(),
                    )));
                }
                registry.register(ExecutorKind::Cached, Arc::new(cached));
            }
            None => tracing::info!("no generator endpoint configured; cached nodes are unavailable"),
        }

        let mut engine = GraphEngine::new(registry);
        let traces = match &config.trace.path {
            Some(path) => {
                ensure_parent(path)?;
                let store = Arc::new(
                    TraceStore::open(path)
                        .with_context(|| format!("opening trace store {}", path.display()))?,
                );
                engine = engine.with_trace_sink(store.clone());
                Some(store)
            }
            None => None,
        };

        tracing::info!(
            sandbox = %config.sandbox.endpoint,
            cache_backend = ?config.cache.backend,
            executors = ?engine.executors().kinds(),
            "runtime ready"
        );

        Ok(Self {
            engine,
            cache,
            breaker,
            traces,
        })
    }
}

/// Open the configured cache store.
pub fn open_cache(config: &CacheConfig, data_dir: Option<&Path>) -> anyhow::Result<Arc<dyn CodeCacheStore>> {
    match config.backend {
        CacheBackend::Memory => Ok(Arc::new(MemoryCodeCache::new(config.eviction.clone()))),
        CacheBackend::Sqlite => {
            let path = sqlite_cache_path(config, data_dir)?;
            ensure_parent(&path)?;
            let store = SqliteCodeCache::open(&path, config.eviction.clone())
                .with_context(|| format!("opening cache {}", path.display()))?;
            Ok(Arc::new(store))
        }
    }
}

fn sqlite_cache_path(config: &CacheConfig, data_dir: Option<&Path>) -> anyhow::Result<PathBuf> {
    match (&config.path, data_dir) {
        (Some(path), _) => Ok(path.clone()),
        (None, Some(dir)) => Ok(dir.join("cache.db")),
        (None, None) => bail!("sqlite cache selected but no cache path or data directory available"),
    }
}

fn ensure_parent(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nf_executor::BreakerState;

    #[test]
    fn default_config_builds_direct_only_runtime() {
        let runtime = Runtime::from_config(&EngineConfig::default(), None).unwrap();
        assert_eq!(runtime.engine.executors().kinds(), vec![ExecutorKind::Direct]);
        assert_eq!(runtime.breaker.state(), BreakerState::Closed);
        assert!(runtime.traces.is_none());
    }

    #[test]
    fn generator_endpoint_enables_cached_nodes() {
        let mut config = EngineConfig::default();
        config.generator.endpoint = Some("http://localhost:9000/generate".into());
        config.cache.semantic = true;
        let runtime = Runtime::from_config(&config, None).unwrap();
        assert_eq!(
            runtime.engine.executors().kinds(),
            vec![ExecutorKind::Cached, ExecutorKind::Direct]
        );
    }

    #[test]
    fn sqlite_cache_needs_a_location() {
        let config = CacheConfig {
            backend: CacheBackend::Sqlite,
            ..Default::default()
        };
        assert!(open_cache(&config, None).is_err());

        let dir = std::env::temp_dir().join(format!("nodeflow-test-{}", std::process::id()));
        let cache = open_cache(&config, Some(dir.as_path())).unwrap();
        assert_eq!(cache.stats().unwrap().entries, 0);
        std::fs::remove_dir_all(&dir).ok();
    }
}
