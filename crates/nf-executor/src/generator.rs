//! Code generation collaborator.

use crate::ExecutorError;
use async_trait::async_trait;
use nf_core::context::{functional_entries, type_name, ContextMap};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub task: String,
    /// Functional context keys mapped to their JSON type names.
    pub context_schema: serde_json::Map<String, Value>,
    /// Errors from earlier attempts at this task, oldest first.
    pub error_history: Vec<String>,
}

impl GenerationRequest {
    pub fn new(task: &str, context: &ContextMap) -> Self {
        Self {
            task: task.to_string(),
            context_schema: context_schema(context),
            error_history: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedCode {
    pub code: String,
    pub model_id: String,
    #[serde(default)]
    pub usage: TokenUsage,
}

/// Key -> type name for every functional key in the context.
pub fn context_schema(context: &ContextMap) -> serde_json::Map<String, Value> {
    functional_entries(context)
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(type_name(v).to_string())))
        .collect()
}

#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedCode, ExecutorError>;
}

/// JSON-over-HTTP generation client: `POST {endpoint}`.
#[derive(Debug, Clone)]
pub struct HttpCodeGenerator {
    endpoint: String,
    model: Option<String>,
    client: reqwest::Client,
}

impl HttpCodeGenerator {
    pub fn new(endpoint: &str, model: Option<String>) -> Result<Self, ExecutorError> {
        url::Url::parse(endpoint)
            .map_err(|e| ExecutorError::Generation(format!("invalid generator endpoint {endpoint}: {e}")))?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            model,
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl CodeGenerator for HttpCodeGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedCode, ExecutorError> {
        let body = serde_json::json!({
            "task": request.task,
            "context_schema": request.context_schema,
            "error_history": request.error_history,
            "model": self.model,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ExecutorError::Generation(format!("generator request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            return Err(ExecutorError::Generation(format!(
                "generator returned {status}: {error_body}"
            )));
        }

        let generated: GeneratedCode = response
            .json()
            .await
            .map_err(|e| ExecutorError::Generation(format!("Response parse failed: {e}")))?;

        if generated.code.trim().is_empty() {
            return Err(ExecutorError::Generation("generator returned empty code".into()));
        }
        tracing::info!(
            model_id = %generated.model_id,
            input_tokens = generated.usage.input_tokens,
            output_tokens = generated.usage.output_tokens,
            "code generated"
        );
        Ok(generated)
    }
}
