//! nf-executor: Node executors and the resilience layer around the sandbox.
//!
//! Every executor implements [`Executor`]. The direct executor ships code to
//! the sandbox behind a [`CircuitBreaker`]; the cached executor consults the
//! code cache first and falls back to the generation service.

pub mod breaker;
pub mod cached;
pub mod direct;
pub mod generator;
pub mod retry;
pub mod sandbox;
pub mod timeout;

pub use breaker::{BreakerSnapshot, BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use cached::CachedGenerationExecutor;
pub use direct::DirectSandboxExecutor;
pub use generator::{CodeGenerator, GeneratedCode, GenerationRequest, HttpCodeGenerator, TokenUsage};
pub use retry::{AttemptOutcome, RetryPolicy};
pub use sandbox::{HttpSandboxClient, SandboxClient, SandboxResponse};

use async_trait::async_trait;
use nf_core::context::ContextMap;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecutorError {
    #[error("sandbox timed out after {0}ms")]
    SandboxTimeout(u64),
    #[error("sandbox error: {0}")]
    SandboxError(String),
    #[error("connection error: {0}")]
    ConnectionError(String),
    #[error("code execution failed: {0}")]
    CodeExecutionError(String),
    #[error("code generation failed: {0}")]
    Generation(String),
}

impl ExecutorError {
    /// Infrastructure failures that may succeed on another try.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SandboxTimeout(_) | Self::SandboxError(_) | Self::ConnectionError(_)
        )
    }

    /// Whether the failure says something about sandbox health.
    /// Code that ran and failed never does.
    pub fn counts_against_breaker(&self) -> bool {
        self.is_retryable()
    }

    /// Whether a fresh generation could plausibly fix the failure. A timeout
    /// may be slow code; sandbox and connection faults are infrastructure.
    pub fn warrants_regeneration(&self) -> bool {
        matches!(self, Self::CodeExecutionError(_) | Self::SandboxTimeout(_))
    }
}

/// What an executor reports alongside the context update.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionMetadata {
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_hit: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    /// The code that actually ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ExecutionMetadata {
    /// Render as a JSON object for trace entries.
    pub fn to_map(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}

/// Partial context update plus metadata from one node execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOutput {
    pub updates: ContextMap,
    pub metadata: ExecutionMetadata,
}

/// A pluggable node executor.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run `payload` (code or task description) against a read-only view of
    /// the context, returning the keys to merge back.
    async fn execute(
        &self,
        payload: &str,
        context: &ContextMap,
        timeout: Duration,
    ) -> Result<ExecutionOutput, ExecutorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        let timeout = ExecutorError::SandboxTimeout(1000);
        let conn = ExecutorError::ConnectionError("refused".into());
        let code = ExecutorError::CodeExecutionError("NameError".into());
        let sandbox = ExecutorError::SandboxError("sandbox returned 503".into());
        let gen = ExecutorError::Generation("503".into());

        assert!(timeout.counts_against_breaker() && timeout.warrants_regeneration());
        assert!(conn.counts_against_breaker() && !conn.warrants_regeneration());
        assert!(!code.counts_against_breaker() && code.warrants_regeneration());
        assert!(sandbox.counts_against_breaker() && !sandbox.warrants_regeneration());
        assert!(!gen.is_retryable() && !gen.warrants_regeneration());
    }

    #[test]
    fn metadata_map_skips_empty_fields() {
        let meta = ExecutionMetadata {
            duration_ms: 12,
            cache_hit: Some(true),
            ..Default::default()
        };
        let map = meta.to_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map["cache_hit"], serde_json::json!(true));
    }
}
