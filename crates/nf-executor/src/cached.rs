//! Cached-generation executor.
//!
//! The node payload is a task description. Code for a (task, context) pair
//! is looked up in the cache; on a miss, or when cached code fails, fresh
//! code is generated and run, up to `RetryPolicy::max_attempts` times.
//! Successful generations are written back, replacing cached code that had
//! just failed. Sandbox and connection faults are returned untouched.

use crate::generator::{CodeGenerator, GeneratedCode, GenerationRequest};
use crate::retry::{AttemptOutcome, RetryPolicy};
use crate::{ExecutionOutput, Executor, ExecutorError};
use async_trait::async_trait;
use nf_cache::{compute_cache_key, CacheEntry, CodeCacheStore, SemanticCodeCache};
use nf_core::context::ContextMap;
use std::sync::Arc;
use std::time::Duration;

pub struct CachedGenerationExecutor {
    cache: Arc<dyn CodeCacheStore>,
    semantic: Option<Arc<SemanticCodeCache>>,
    generator: Arc<dyn CodeGenerator>,
    /// Runs code in the sandbox; normally a `DirectSandboxExecutor`.
    runner: Arc<dyn Executor>,
    retry: RetryPolicy,
}

/// Where a replayed payload came from.
enum CacheSource {
    Exact,
    Semantic(f32),
}

impl CachedGenerationExecutor {
    pub fn new(
        cache: Arc<dyn CodeCacheStore>,
        generator: Arc<dyn CodeGenerator>,
        runner: Arc<dyn Executor>,
    ) -> Self {
        Self {
            cache,
            semantic: None,
            generator,
            runner,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_semantic_cache(mut self, semantic: Arc<SemanticCodeCache>) -> Self {
        self.semantic = Some(semantic);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replay cached code and record the outcome against the entry.
    /// Returns `Ok(None)` when the code failed and generation should take over.
    async fn replay(
        &self,
        entry: &CacheEntry,
        source: CacheSource,
        context: &ContextMap,
        timeout: Duration,
        history: &mut Vec<String>,
    ) -> Result<Option<ExecutionOutput>, ExecutorError> {
        let key = entry.key.as_str();
        let result = self.runner.execute(&entry.payload, context, timeout).await;
        // Infrastructure trouble says nothing about the cached code.
        if matches!(&result, Err(e) if !matches!(e, ExecutorError::CodeExecutionError(_))) {
            return result.map(Some);
        }
        let success = result.is_ok();

        let evicted = match &source {
            CacheSource::Exact => self
                .cache
                .record_outcome(key, success)
                .and_then(|_| self.cache.maybe_evict(key)),
            CacheSource::Semantic(_) => match &self.semantic {
                Some(semantic) => semantic
                    .record_outcome(key, success)
                    .and_then(|_| semantic.maybe_evict(key)),
                None => Ok(false),
            },
        };
        if let Err(e) = evicted {
            tracing::warn!(cache_key = key, error = %e, "failed to record cache outcome");
        }

        match result {
            Ok(mut output) => {
                output.metadata.cache_hit = Some(true);
                output.metadata.cache_key = Some(key.to_string());
                output.metadata.model_id = Some(entry.model_id.clone());
                output.metadata.code = Some(entry.payload.clone());
                if let CacheSource::Semantic(similarity) = source {
                    output.metadata.similarity = Some(similarity);
                }
                tracing::info!(cache_key = key, "cached code replayed");
                Ok(Some(output))
            }
            Err(e) => {
                tracing::warn!(cache_key = key, error = %e, "cached code failed, regenerating");
                history.push(e.to_string());
                Ok(None)
            }
        }
    }

    async fn generate_and_run(
        &self,
        task: &str,
        context: &ContextMap,
        timeout: Duration,
        history: Vec<String>,
    ) -> AttemptOutcome<(GeneratedCode, ExecutionOutput)> {
        let mut request = GenerationRequest::new(task, context);
        request.error_history = history;
        let mut attempts = 0;

        loop {
            attempts += 1;
            let generated = match self.generator.generate(&request).await {
                Ok(generated) => generated,
                Err(error) => return AttemptOutcome::Fatal { attempts, error },
            };

            match self.runner.execute(&generated.code, context, timeout).await {
                Ok(output) => {
                    return AttemptOutcome::Succeeded {
                        value: (generated, output),
                        attempts,
                    }
                }
                Err(error) if error.warrants_regeneration() => {
                    tracing::warn!(attempt = attempts, error = %error, "generated code failed");
                    request.error_history.push(error.to_string());
                    if !self.retry.has_attempts_left(attempts) {
                        return AttemptOutcome::Exhausted {
                            attempts,
                            last_error: error,
                        };
                    }
                    let delay = self.retry.compute_delay(attempts - 1);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(error) => return AttemptOutcome::Fatal { attempts, error },
            }
        }
    }

    /// Write generated code back. `supersede` replaces an exact entry whose
    /// code failed on this call.
    fn save(
        &self,
        key: &str,
        task: &str,
        generated: &GeneratedCode,
        context: &ContextMap,
        supersede: bool,
    ) {
        let saved = if supersede {
            self.cache
                .replace(key, &generated.code, &generated.model_id, task)
                .map(|_| true)
        } else {
            self.cache.save(key, &generated.code, &generated.model_id, task)
        };
        match saved {
            Ok(true) => tracing::info!(cache_key = key, model_id = %generated.model_id, supersede, "generated code cached"),
            Ok(false) => tracing::debug!(cache_key = key, "cache entry already present"),
            Err(e) => tracing::warn!(cache_key = key, error = %e, "failed to cache generated code"),
        }
        if let Some(semantic) = &self.semantic {
            if let Err(e) = semantic.save(key, &generated.code, &generated.model_id, task, context) {
                tracing::warn!(cache_key = key, error = %e, "failed to index generated code");
            }
        }
    }
}

#[async_trait]
impl Executor for CachedGenerationExecutor {
    async fn execute(
        &self,
        payload: &str,
        context: &ContextMap,
        timeout: Duration,
    ) -> Result<ExecutionOutput, ExecutorError> {
        let key = compute_cache_key(payload, context);
        let mut history = Vec::new();
        let mut exact_failed = false;

        let exact = self.cache.lookup(&key).unwrap_or_else(|e| {
            tracing::warn!(cache_key = %key, error = %e, "cache lookup failed, treating as miss");
            None
        });

        if let Some(entry) = exact {
            if let Some(output) = self
                .replay(&entry, CacheSource::Exact, context, timeout, &mut history)
                .await?
            {
                return Ok(output);
            }
            exact_failed = true;
        } else if let Some(semantic) = &self.semantic {
            match semantic.lookup(payload, context) {
                Ok(Some(hit)) => {
                    let source = CacheSource::Semantic(hit.similarity);
                    if let Some(output) = self
                        .replay(&hit.entry, source, context, timeout, &mut history)
                        .await?
                    {
                        return Ok(output);
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "semantic lookup failed"),
            }
        }

        tracing::debug!(cache_key = %key, "cache miss, generating");
        let outcome = self.generate_and_run(payload, context, timeout, history).await;
        let attempts = outcome.attempts();
        let (generated, mut output) = outcome.into_result()?;

        self.save(&key, payload, &generated, context, exact_failed);

        output.metadata.cache_hit = Some(false);
        output.metadata.cache_key = Some(key);
        output.metadata.generation_attempts = Some(attempts);
        output.metadata.model_id = Some(generated.model_id);
        output.metadata.code = Some(generated.code);
        Ok(output)
    }
}
