use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::engine::types::{RunStatus, TaskDefinition, TaskRun};

/// Upper bound on a single retry delay.
const MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// Retry configuration for task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first.
    pub max_retries: u32,
    /// Initial backoff duration in seconds (doubles each attempt).
    pub backoff_s: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_s: 1.0,
        }
    }
}

/// Outcome of executing a task, after retries.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub status: RunStatus,
    /// Serialized response body on success, error description on failure.
    pub message: String,
}

impl ExecutionResult {
    pub fn success(message: String) -> Self {
        Self {
            status: RunStatus::Success,
            message,
        }
    }

    pub fn failure(message: String) -> Self {
        Self {
            status: RunStatus::Failed,
            message,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status == RunStatus::Failed
    }
}

/// Performs one call to a task's external endpoint.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Send `request` for `task` and return the parsed JSON response.
    /// Non-2xx responses and transport failures are errors.
    async fn execute(&self, task: &TaskDefinition, request: &serde_json::Value) -> Result<serde_json::Value>;
}

/// Runs a task with the retry policy, classifying the final outcome.
pub async fn execute_with_retry(
    runner: &dyn TaskRunner,
    task: &TaskDefinition,
    task_run: &TaskRun,
    request: &serde_json::Value,
    retry: &RetryConfig,
) -> ExecutionResult {
    let max_attempts = retry.max_retries.saturating_add(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        info!(
            task = %task.name,
            task_run_id = task_run.id,
            attempt,
            max = max_attempts,
            "Calling task endpoint"
        );

        match runner.execute(task, request).await {
            Ok(response) => return ExecutionResult::success(response.to_string()),
            Err(e) => {
                last_error = format!("{:#}", e);
                warn!(
                    task = %task.name,
                    task_run_id = task_run.id,
                    attempt,
                    error = %last_error,
                    "Task attempt failed"
                );

                if attempt < max_attempts {
                    let delay = backoff_delay(retry.backoff_s, attempt);
                    info!(task = %task.name, delay_s = delay.as_secs_f64(), "Retrying after backoff");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    ExecutionResult::failure(format!(
        "Task '{}' failed after {} attempts: {}",
        task.name, max_attempts, last_error
    ))
}

/// Delay before the retry that follows `attempt`: `backoff_s * 2^(attempt-1)`,
/// capped at [`MAX_BACKOFF`]. Negative or NaN backoff means no delay.
fn backoff_delay(backoff_s: f64, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
    let delay = backoff_s * 2.0_f64.powi(exponent);
    if delay.is_nan() || delay <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(delay)
        .unwrap_or(MAX_BACKOFF)
        .min(MAX_BACKOFF)
}

/// Calls task endpoints over HTTP with a JSON body.
///
/// The endpoint comes from the task's `parameters.endpoint`; relative paths
/// are joined onto the service base url. `parameters.method` defaults to POST
/// and `parameters.headers` adds request headers.
pub struct HttpTaskRunner {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTaskRunner {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn resolve_url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl TaskRunner for HttpTaskRunner {
    async fn execute(&self, task: &TaskDefinition, request: &serde_json::Value) -> Result<serde_json::Value> {
        let parameters = task.parameters.as_ref();

        let endpoint = parameters
            .and_then(|p| p.get("endpoint"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("Task '{}' has no 'endpoint' parameter", task.name))?;
        let url = self.resolve_url(endpoint);

        let method = parameters
            .and_then(|p| p.get("method"))
            .and_then(|v| v.as_str())
            .unwrap_or("POST")
            .to_uppercase();

        let mut builder = match method.as_str() {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url).json(request),
            "PUT" => self.client.put(&url).json(request),
            "PATCH" => self.client.patch(&url).json(request),
            "DELETE" => self.client.delete(&url),
            _ => bail!("Unsupported HTTP method: {}", method),
        };

        if let Some(headers) = parameters
            .and_then(|p| p.get("headers"))
            .and_then(|v| v.as_object())
        {
            let mut header_map = HeaderMap::new();
            for (k, v) in headers {
                if let Some(val) = v.as_str() {
                    header_map.insert(HeaderName::from_bytes(k.as_bytes())?, HeaderValue::from_str(val)?);
                }
            }
            builder = builder.headers(header_map);
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("HTTP {} {} failed", method, url))?;

        let status = response.status();
        let body_text = response.text().await?;

        if !status.is_success() {
            bail!(
                "HTTP {} {} returned status {}: {}",
                method,
                url,
                status.as_u16(),
                body_text
            );
        }

        serde_json::from_str(&body_text)
            .with_context(|| format!("HTTP {} {} returned a non-JSON body", method, url))
    }
}
