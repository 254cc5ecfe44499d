//! Thin HTTP client over `gowe-api`'s worker protocol (spec §4.6, §6):
//! register, heartbeat, checkout, and the two progress reports. Mirrors
//! the request/response shapes in `gowe-api::api::workers` field for
//! field since this crate cannot depend on that binary crate directly.

use gowe_core::{HeartbeatInstruction, Task, TaskState, Worker, WorkerState};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{AgentError, AgentResult};

#[derive(Debug, Serialize)]
struct RegisterWorkerRequest {
    name: String,
    host: String,
    group: String,
    runtime_tag: String,
    capabilities: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RegisterWorkerResponse {
    worker: Worker,
}

#[derive(Debug, Serialize)]
struct HeartbeatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<WorkerState>,
}

#[derive(Debug, Deserialize)]
struct HeartbeatResponse {
    instruction: HeartbeatInstruction,
}

#[derive(Debug, Serialize)]
struct TaskStatusRequest {
    state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<String>,
}

#[derive(Debug, Serialize)]
struct TaskCompleteRequest {
    state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_code: Option<i32>,
    retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stderr: Option<String>,
    outputs: Value,
}

/// Outcome of running a Task, handed to `AgentClient::report_complete`.
pub struct TaskOutcome {
    pub state: TaskState,
    pub exit_code: Option<i32>,
    /// Mirrors the tool's `temporaryFailCodes` classification (spec §6
    /// "Exit code semantics"): `false` tells the server not to spend this
    /// Task's retry budget on the failure. Meaningless when `state` is
    /// `Succeeded`.
    pub retryable: bool,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub outputs: Value,
}

/// Client-side half of the pull protocol: one instance per running agent
/// process, reused across every call against a single server.
pub struct AgentClient {
    http: reqwest::Client,
    base_url: String,
}

impl AgentClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        AgentClient {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// `POST /v1/workers`.
    pub async fn register(
        &self,
        name: &str,
        host: &str,
        group: &str,
        runtime_tag: &str,
        capabilities: &[String],
    ) -> AgentResult<Worker> {
        let resp = self
            .http
            .post(self.url("/v1/workers"))
            .json(&RegisterWorkerRequest {
                name: name.to_string(),
                host: host.to_string(),
                group: group.to_string(),
                runtime_tag: runtime_tag.to_string(),
                capabilities: capabilities.to_vec(),
            })
            .send()
            .await
            .map_err(|e| AgentError::Request("register".into(), e))?;

        let body: RegisterWorkerResponse = decode(resp, "register").await?;
        Ok(body.worker)
    }

    /// `PUT /v1/workers/{id}/heartbeat`.
    pub async fn heartbeat(&self, worker_id: Uuid, requested_state: Option<WorkerState>) -> AgentResult<HeartbeatInstruction> {
        let resp = self
            .http
            .put(self.url(&format!("/v1/workers/{worker_id}/heartbeat")))
            .json(&HeartbeatRequest { state: requested_state })
            .send()
            .await
            .map_err(|e| AgentError::Request("heartbeat".into(), e))?;

        let body: HeartbeatResponse = decode(resp, "heartbeat").await?;
        Ok(body.instruction)
    }

    /// `GET /v1/workers/{id}/work`. `Ok(None)` is the 204 "nothing eligible"
    /// case, not an error.
    pub async fn checkout_work(&self, worker_id: Uuid) -> AgentResult<Option<Task>> {
        let resp = self
            .http
            .get(self.url(&format!("/v1/workers/{worker_id}/work")))
            .send()
            .await
            .map_err(|e| AgentError::Request("checkout".into(), e))?;

        if resp.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let task: Task = decode(resp, "checkout").await?;
        Ok(Some(task))
    }

    /// `PUT /v1/workers/{id}/tasks/{tid}/status`.
    pub async fn report_status(&self, worker_id: Uuid, task_id: Uuid, progress: Option<String>) -> AgentResult<()> {
        let resp = self
            .http
            .put(self.url(&format!("/v1/workers/{worker_id}/tasks/{task_id}/status")))
            .json(&TaskStatusRequest {
                state: TaskState::Running,
                progress,
            })
            .send()
            .await
            .map_err(|e| AgentError::Request("report_status".into(), e))?;

        decode::<Task>(resp, "report_status").await?;
        Ok(())
    }

    /// `PUT /v1/workers/{id}/tasks/{tid}/complete`.
    pub async fn report_complete(&self, worker_id: Uuid, task_id: Uuid, outcome: TaskOutcome) -> AgentResult<()> {
        let resp = self
            .http
            .put(self.url(&format!("/v1/workers/{worker_id}/tasks/{task_id}/complete")))
            .json(&TaskCompleteRequest {
                state: outcome.state,
                exit_code: outcome.exit_code,
                retryable: outcome.retryable,
                stdout: outcome.stdout,
                stderr: outcome.stderr,
                outputs: outcome.outputs,
            })
            .send()
            .await
            .map_err(|e| AgentError::Request("report_complete".into(), e))?;

        decode::<Task>(resp, "report_complete").await?;
        Ok(())
    }

    /// `DELETE /v1/workers/{id}`, best-effort on shutdown.
    pub async fn deregister(&self, worker_id: Uuid) -> AgentResult<()> {
        let resp = self
            .http
            .delete(self.url(&format!("/v1/workers/{worker_id}")))
            .send()
            .await
            .map_err(|e| AgentError::Request("deregister".into(), e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::Server("deregister".into(), status, body));
        }
        Ok(())
    }
}

async fn decode<T: for<'de> Deserialize<'de>>(resp: reqwest::Response, op: &str) -> AgentResult<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(AgentError::Server(op.to_string(), status, body));
    }
    resp.json::<T>().await.map_err(|e| AgentError::Request(op.to_string(), e))
}
