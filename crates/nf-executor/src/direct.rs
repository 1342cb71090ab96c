//! Direct sandbox executor: breaker check, timed sandbox call, envelope
//! classification.

use crate::breaker::CircuitBreaker;
use crate::sandbox::SandboxClient;
use crate::timeout::with_timeout;
use crate::{ExecutionMetadata, ExecutionOutput, Executor, ExecutorError};
use async_trait::async_trait;
use nf_core::context::ContextMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct DirectSandboxExecutor {
    sandbox: Arc<dyn SandboxClient>,
    breaker: Arc<CircuitBreaker>,
}

impl DirectSandboxExecutor {
    pub fn new(sandbox: Arc<dyn SandboxClient>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { sandbox, breaker }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

#[async_trait]
impl Executor for DirectSandboxExecutor {
    async fn execute(
        &self,
        payload: &str,
        context: &ContextMap,
        timeout: Duration,
    ) -> Result<ExecutionOutput, ExecutorError> {
        if self.breaker.is_open() {
            tracing::warn!(breaker = %self.breaker.name(), "circuit open, failing fast");
            return Err(ExecutorError::ConnectionError(format!(
                "circuit breaker '{}' is open",
                self.breaker.name()
            )));
        }

        let start = Instant::now();
        let response = match with_timeout(timeout, self.sandbox.run(payload, context, timeout)).await {
            Ok(response) => response,
            Err(e) => {
                self.breaker.record_error(&e);
                tracing::warn!(error = %e, "sandbox call failed");
                return Err(e);
            }
        };
        // The sandbox answered, so it is healthy even if the code failed.
        self.breaker.record_success();

        if let Some(failure) = response.failure() {
            return Err(ExecutorError::CodeExecutionError(failure));
        }

        Ok(ExecutionOutput {
            updates: response.updated_fields,
            metadata: ExecutionMetadata {
                duration_ms: start.elapsed().as_millis() as u64,
                stdout: response.stdout,
                stderr: response.stderr,
                exit_code: Some(response.exit_code),
                ..Default::default()
            },
        })
    }
}
