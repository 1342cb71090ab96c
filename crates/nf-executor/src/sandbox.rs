//! Sandbox service client.
//!
//! The sandbox runs code against a context and answers with an envelope:
//! `{updated_fields, stdout, stderr, exit_code, error?}`.

use crate::ExecutorError;
use async_trait::async_trait;
use nf_core::context::ContextMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Serialize)]
struct SandboxRequest<'a> {
    code: &'a str,
    context: &'a ContextMap,
    timeout: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxResponse {
    pub updated_fields: ContextMap,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub error: Option<String>,
}

impl SandboxResponse {
    /// The failure message when the code ran but did not succeed.
    pub fn failure(&self) -> Option<String> {
        if let Some(error) = &self.error {
            return Some(error.clone());
        }
        if self.exit_code != 0 {
            let detail = self.stderr.trim();
            return Some(if detail.is_empty() {
                format!("exit code {}", self.exit_code)
            } else {
                format!("exit code {}: {detail}", self.exit_code)
            });
        }
        None
    }
}

#[async_trait]
pub trait SandboxClient: Send + Sync {
    async fn run(
        &self,
        code: &str,
        context: &ContextMap,
        timeout: Duration,
    ) -> Result<SandboxResponse, ExecutorError>;
}

/// JSON-over-HTTP client: `POST {endpoint}/run`.
#[derive(Debug, Clone)]
pub struct HttpSandboxClient {
    run_url: String,
    client: reqwest::Client,
}

impl HttpSandboxClient {
    pub fn new(endpoint: &str) -> Result<Self, ExecutorError> {
        let parsed = Url::parse(endpoint)
            .map_err(|e| ExecutorError::ConnectionError(format!("invalid sandbox endpoint {endpoint}: {e}")))?;
        Ok(Self {
            run_url: format!("{}/run", parsed.as_str().trim_end_matches('/')),
            client: reqwest::Client::new(),
        })
    }

    pub fn run_url(&self) -> &str {
        &self.run_url
    }
}

fn classify(e: reqwest::Error, timeout: Duration) -> ExecutorError {
    if e.is_timeout() {
        ExecutorError::SandboxTimeout(timeout.as_millis() as u64)
    } else if e.is_connect() || e.is_request() {
        ExecutorError::ConnectionError(e.to_string())
    } else {
        ExecutorError::SandboxError(e.to_string())
    }
}

#[async_trait]
impl SandboxClient for HttpSandboxClient {
    async fn run(
        &self,
        code: &str,
        context: &ContextMap,
        timeout: Duration,
    ) -> Result<SandboxResponse, ExecutorError> {
        let body = SandboxRequest {
            code,
            context,
            timeout: timeout.as_secs(),
        };

        let response = self
            .client
            .post(&self.run_url)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ExecutorError::SandboxError(format!(
                "sandbox returned {status}: {error_body}"
            )));
        }

        response
            .json::<SandboxResponse>()
            .await
            .map_err(|e| ExecutorError::SandboxError(format!("Response parse failed: {e}")))
    }
}
