//! Dispatches a task to the BV-BRC application service over JSON-RPC
//! (spec §4.5 `bvbrc` executor). An async backend: `submit` only enqueues
//! the app run and returns BV-BRC's job ID as the handle; `status` polls
//! the service for completion on later ticks.

use async_trait::async_trait;
use gowe_core::reserved;
use gowe_core::{Executor, ExecutorError, StatusReport, Task, TaskLogs};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u32,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    message: String,
}

/// Talks to a BV-BRC-compatible JSON-RPC application service.
pub struct BvbrcExecutor {
    client: reqwest::Client,
    endpoint: String,
    auth_token: Option<String>,
}

impl BvbrcExecutor {
    pub fn new(endpoint: impl Into<String>, auth_token: Option<String>) -> Self {
        BvbrcExecutor {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            auth_token,
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ExecutorError> {
        let mut request = self.client.post(&self.endpoint).json(&RpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: 1,
        });

        if let Some(token) = &self.auth_token {
            request = request.header("Authorization", format!("OAuth {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExecutorError::Unavailable(format!("bvbrc request failed: {e}")))?;

        let parsed: RpcResponse = response
            .json()
            .await
            .map_err(|e| ExecutorError::Transient(format!("bvbrc response decode failed: {e}")))?;

        if let Some(error) = parsed.error {
            return Err(ExecutorError::Permanent(error.message));
        }

        parsed
            .result
            .ok_or_else(|| ExecutorError::Transient("bvbrc response had no result".to_string()))
    }
}

#[async_trait]
impl Executor for BvbrcExecutor {
    async fn submit(&self, task: &Task) -> Result<String, ExecutorError> {
        let app_id = task
            .resolved_inputs
            .get(reserved::BVBRC_APP_ID)
            .and_then(Value::as_str)
            .ok_or_else(|| ExecutorError::Permanent("task has no _bvbrc_app_id".to_string()))?;

        let result = self
            .call("AppService.start_app", serde_json::json!([app_id, task.resolved_inputs, task.id.to_string()]))
            .await?;

        result
            .get("job_id")
            .or_else(|| result.as_str().map(|_| &result))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ExecutorError::Transient("bvbrc start_app response had no job_id".to_string()))
    }

    async fn status(&self, handle: &str) -> Result<StatusReport, ExecutorError> {
        let result = self
            .call("AppService.query_task_summary", serde_json::json!([handle]))
            .await?;

        let state = result.get("status").and_then(Value::as_str).unwrap_or("queued");

        let exit_code = result.get("exit_code").and_then(Value::as_i64).map(|n| n as i32);

        Ok(match state {
            "completed" => StatusReport::Succeeded {
                outputs: result.get("outputs").cloned().unwrap_or(Value::Null),
                exit_code,
            },
            "failed" | "deleted" | "error" => StatusReport::Failed {
                error: result
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("bvbrc task failed")
                    .to_string(),
                exit_code,
                retryable: true,
            },
            _ => StatusReport::InProgress,
        })
    }

    async fn logs(&self, handle: &str) -> Result<TaskLogs, ExecutorError> {
        let result = self
            .call("AppService.query_task_details", serde_json::json!([handle]))
            .await?;

        Ok(TaskLogs {
            stdout: result.get("stdout").and_then(Value::as_str).unwrap_or_default().to_string(),
            stderr: result.get("stderr").and_then(Value::as_str).unwrap_or_default().to_string(),
        })
    }

    async fn cancel(&self, handle: &str) -> Result<(), ExecutorError> {
        self.call("AppService.kill_task", serde_json::json!([handle])).await?;
        Ok(())
    }
}
