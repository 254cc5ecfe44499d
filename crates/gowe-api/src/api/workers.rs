//! Worker-agent pull protocol: registration, heartbeat, work checkout,
//! progress/completion reports, and deregistration (spec §4.6, §6).
//!
//! The registration/heartbeat/deregister handlers mutate the `workers`
//! table directly; work checkout is routed through the channel-serialized
//! `WorkerQueueHandle` (`gowe-engine::worker_queue`) so two concurrent
//! checkout requests can never race for the same task (Data Model
//! invariant 6). Progress/completion reports write straight onto the Task
//! row — the scheduler's phase-4 poll and phase-5 finalize pick these up
//! out-of-band on the next tick (spec §4.6, §4.2 phase 5 note).

use axum::extract::{Path, State};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use gowe_core::{HeartbeatInstruction, Task, TaskState, Worker, WorkerState};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// spec.md §6 `POST /workers`: "registration profile".
#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterWorkerRequest {
    pub name: String,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default = "default_runtime_tag")]
    pub runtime_tag: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

fn default_group() -> String {
    "default".to_string()
}

fn default_runtime_tag() -> String {
    "bare".to_string()
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RegisterWorkerResponse {
    pub worker: Worker,
}

/// spec.md §6 `PUT /workers/{id}/heartbeat`: "status".
#[derive(Debug, Deserialize, ToSchema)]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub state: Option<WorkerState>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HeartbeatResponse {
    pub instruction: HeartbeatInstruction,
}

/// spec.md §6 `PUT /workers/{id}/tasks/{tid}/status`: "state+progress".
#[derive(Debug, Deserialize, ToSchema)]
pub struct TaskStatusRequest {
    /// Only `Running` is meaningful here; a worker reports a terminal
    /// state through `complete` instead (spec §4.2 phase 4 "on
    /// transition to RUNNING, set `started_at` if empty").
    pub state: TaskState,
    #[serde(default)]
    pub progress: Option<String>,
}

/// spec.md §6 `PUT /workers/{id}/tasks/{tid}/complete`: "state+exit_code+
/// stdout+stderr+outputs".
#[derive(Debug, Deserialize, ToSchema)]
pub struct TaskCompleteRequest {
    pub state: TaskState,
    #[serde(default)]
    pub exit_code: Option<i32>,
    /// Whether this failure is retry-eligible per the tool's
    /// `temporaryFailCodes` (spec §6 "Exit code semantics"). Ignored when
    /// `state` is `Succeeded`.
    #[serde(default = "default_retryable")]
    pub retryable: bool,
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    #[serde(default)]
    pub outputs: Value,
}

fn default_retryable() -> bool {
    true
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/workers", post(register_worker))
        .route("/v1/workers/:id", delete(deregister_worker))
        .route("/v1/workers/:id/heartbeat", put(heartbeat))
        .route("/v1/workers/:id/work", get(checkout_work))
        .route("/v1/workers/:id/tasks/:tid/status", put(report_status))
        .route("/v1/workers/:id/tasks/:tid/complete", put(report_complete))
        .with_state(state)
}

/// POST /v1/workers
#[utoipa::path(
    post,
    path = "/v1/workers",
    request_body = RegisterWorkerRequest,
    responses((status = 201, description = "Worker registered", body = RegisterWorkerResponse)),
    tag = "workers"
)]
pub async fn register_worker(
    State(state): State<AppState>,
    Json(req): Json<RegisterWorkerRequest>,
) -> ApiResult<(axum::http::StatusCode, Json<RegisterWorkerResponse>)> {
    let now = Utc::now();
    let worker = Worker {
        id: Uuid::now_v7(),
        name: req.name,
        host: req.host,
        group: req.group,
        runtime_tag: req.runtime_tag,
        capabilities: req.capabilities,
        state: WorkerState::Idle,
        current_task_id: None,
        registered_at: now,
        last_heartbeat_at: now,
    };
    let worker = state.store.upsert_worker(worker).await?;
    Ok((axum::http::StatusCode::CREATED, Json(RegisterWorkerResponse { worker })))
}

/// DELETE /v1/workers/{id}
///
/// A worker deregistering while it still holds a task leaves that task
/// orphaned, so this fails it the same way the stale-worker TTL sweep
/// does (spec §4.7 "stale worker (TTL exceeded) -> held task marked
/// FAILED (retryable)") rather than leaving it stuck in RUNNING forever.
#[utoipa::path(
    delete,
    path = "/v1/workers/{id}",
    params(("id" = Uuid, Path, description = "Worker ID")),
    responses(
        (status = 204, description = "Worker deregistered"),
        (status = 404, description = "No such worker"),
    ),
    tag = "workers"
)]
pub async fn deregister_worker(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<axum::http::StatusCode> {
    let worker = state.store.get_worker(id).await?;
    if let Some(task_id) = worker.current_task_id {
        if let Ok(mut task) = state.store.get_task(task_id).await {
            if !task.state.is_terminal() {
                task.last_error = Some(format!("worker {id} deregistered while holding this task"));
                task.transition_to(TaskState::Failed, Utc::now())
                    .map_err(gowe_core::DomainError::from)?;
                state.store.update_task(task).await?;
            }
        }
    }
    state.store.delete_worker(id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// PUT /v1/workers/{id}/heartbeat
///
/// Updates `last_heartbeat_at` and, if the worker's own report names a
/// new state (e.g. requesting to drain), applies it when legal. Responds
/// with the instruction the worker should follow going forward (spec
/// §4.6 "heartbeat may carry an instruction back").
#[utoipa::path(
    put,
    path = "/v1/workers/{id}/heartbeat",
    params(("id" = Uuid, Path, description = "Worker ID")),
    request_body = HeartbeatRequest,
    responses(
        (status = 200, description = "Heartbeat accepted", body = HeartbeatResponse),
        (status = 404, description = "No such worker"),
    ),
    tag = "workers"
)]
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<HeartbeatRequest>,
) -> ApiResult<Json<HeartbeatResponse>> {
    let mut worker = state.store.get_worker(id).await?;
    worker.last_heartbeat_at = Utc::now();

    if let Some(requested) = req.state {
        if worker.state.can_transition_to(requested) {
            worker.state = requested;
        }
    }

    let instruction = match worker.state {
        WorkerState::Draining => HeartbeatInstruction::Drain,
        WorkerState::Offline => HeartbeatInstruction::CancelCurrent,
        _ => HeartbeatInstruction::Continue,
    };

    state.store.upsert_worker(worker).await?;
    Ok(Json(HeartbeatResponse { instruction }))
}

/// GET /v1/workers/{id}/work
///
/// Submits a checkout request to the Worker Queue Dispatcher (spec §4.6)
/// and returns the claimed Task, or 204 No Content when nothing is
/// eligible.
#[utoipa::path(
    get,
    path = "/v1/workers/{id}/work",
    params(("id" = Uuid, Path, description = "Worker ID")),
    responses(
        (status = 200, description = "A Task claimed for this worker", body = Task),
        (status = 204, description = "No eligible Task right now"),
        (status = 404, description = "No such worker"),
    ),
    tag = "workers"
)]
pub async fn checkout_work(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<axum::response::Response> {
    use axum::response::IntoResponse;

    let worker = state.store.get_worker(id).await?;
    let task = state.worker_queue.checkout(id, worker.capabilities).await?;

    match task {
        Some(task) => Ok(Json(task).into_response()),
        None => Ok(axum::http::StatusCode::NO_CONTENT.into_response()),
    }
}

/// PUT /v1/workers/{id}/tasks/{tid}/status
///
/// In-flight progress report; only a transition into RUNNING is
/// meaningful (spec §4.1 "QUEUED/RUNNING -> RUNNING ... record
/// `started_at` if unset"). `progress` has no persisted home on the Task
/// model and is logged only.
#[utoipa::path(
    put,
    path = "/v1/workers/{id}/tasks/{tid}/status",
    params(
        ("id" = Uuid, Path, description = "Worker ID"),
        ("tid" = Uuid, Path, description = "Task ID"),
    ),
    request_body = TaskStatusRequest,
    responses(
        (status = 200, description = "Status recorded", body = Task),
        (status = 404, description = "No such worker or task"),
        (status = 409, description = "Task is not assigned to this worker"),
    ),
    tag = "workers"
)]
pub async fn report_status(
    State(state): State<AppState>,
    Path((worker_id, task_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<TaskStatusRequest>,
) -> ApiResult<Json<Task>> {
    let mut task = own_task_or_conflict(&state, worker_id, task_id).await?;

    if let Some(progress) = &req.progress {
        tracing::debug!(task_id = %task_id, worker_id = %worker_id, progress, "worker progress report");
    }

    if req.state == TaskState::Running && task.state != TaskState::Running {
        task.transition_to(TaskState::Running, Utc::now())
            .map_err(gowe_core::DomainError::from)?;
        task = state.store.update_task(task).await?;
    }

    Ok(Json(task))
}

/// PUT /v1/workers/{id}/tasks/{tid}/complete
///
/// Terminal report: records exit code, captured streams, outputs, and
/// transitions the Task to its reported terminal state. Also releases
/// the worker back to IDLE so it becomes eligible for its next checkout.
#[utoipa::path(
    put,
    path = "/v1/workers/{id}/tasks/{tid}/complete",
    params(
        ("id" = Uuid, Path, description = "Worker ID"),
        ("tid" = Uuid, Path, description = "Task ID"),
    ),
    request_body = TaskCompleteRequest,
    responses(
        (status = 200, description = "Task finalized", body = Task),
        (status = 404, description = "No such worker or task"),
        (status = 409, description = "Task is not assigned to this worker, or not a terminal state"),
    ),
    tag = "workers"
)]
pub async fn report_complete(
    State(state): State<AppState>,
    Path((worker_id, task_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<TaskCompleteRequest>,
) -> ApiResult<Json<Task>> {
    if !req.state.is_terminal() {
        return Err(ApiError::Validation(format!(
            "complete report must carry a terminal state, got {:?}",
            req.state
        )));
    }

    let mut task = own_task_or_conflict(&state, worker_id, task_id).await?;

    task.stdout = req.stdout;
    task.stderr = req.stderr;
    if req.state == TaskState::Succeeded {
        task.outputs = req.outputs;
    } else {
        task.last_error = exit_code_error(req.exit_code);
        if !req.retryable {
            task.retry_count = task.max_retries;
        }
    }

    task.transition_to(req.state, Utc::now())
        .map_err(gowe_core::DomainError::from)?;
    let task = state.store.update_task(task).await?;

    let mut worker = state.store.get_worker(worker_id).await?;
    worker.state = WorkerState::Idle;
    worker.current_task_id = None;
    state.store.upsert_worker(worker).await?;

    Ok(Json(task))
}

fn exit_code_error(exit_code: Option<i32>) -> Option<String> {
    exit_code.map(|code| format!("task exited with status {code}"))
}

/// Loads `task_id` and verifies `worker_id` currently holds it (spec Data
/// Model invariant 5: "A Task assigned to a Worker has its external ID
/// equal to that Worker's ID while the Worker holds it").
async fn own_task_or_conflict(state: &AppState, worker_id: Uuid, task_id: Uuid) -> ApiResult<Task> {
    let task = state.store.get_task(task_id).await?;
    match &task.executor_handle {
        Some(handle) if handle == &worker_id.to_string() => Ok(task),
        _ => Err(ApiError::Conflict(format!(
            "task {task_id} is not currently assigned to worker {worker_id}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gowe_core::ExecutorType;
    use gowe_engine::prelude::{Scheduler, SchedulerConfig, WorkerQueue, WorkerQueueConfig};
    use gowe_executors::prelude::Registry;
    use gowe_resolver::prelude::NullEvaluator;
    use gowe_store::memory::InMemoryStore;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::watch;

    async fn test_state() -> AppState {
        let store: Arc<dyn gowe_store::store::Store> = Arc::new(InMemoryStore::new());
        let registry = Arc::new(Registry::new());
        let (_tx, rx) = watch::channel(false);
        let _ = Scheduler::new(store.clone(), registry.clone(), Arc::new(NullEvaluator), SchedulerConfig::default());
        let worker_queue = WorkerQueue::new(store.clone(), WorkerQueueConfig::default());
        let worker_queue_handle = worker_queue.handle();
        tokio::spawn(worker_queue.run(rx));

        AppState {
            store,
            registry,
            worker_queue: worker_queue_handle,
            default_executor_type: ExecutorType::Local,
            default_max_retries: 0,
            started_at: std::time::Instant::now(),
        }
    }

    fn sample_task(state: TaskState) -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::now_v7(),
            submission_id: Uuid::now_v7(),
            step_id: "step1".into(),
            depends_on: vec![],
            state,
            executor_type: ExecutorType::Worker,
            executor_handle: None,
            resolved_inputs: Value::Null,
            outputs: Value::Null,
            stdout: None,
            stderr: None,
            retry_count: 0,
            max_retries: 1,
            last_error: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn register_then_checkout_claims_a_scheduled_task() {
        let state = test_state().await;
        let (status, Json(reg)) = register_worker(
            State(state.clone()),
            Json(RegisterWorkerRequest {
                name: "w1".into(),
                host: "10.0.0.2".into(),
                group: "default".into(),
                runtime_tag: "bare".into(),
                capabilities: vec![],
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, axum::http::StatusCode::CREATED);

        let task = state.store.create_task(sample_task(TaskState::Scheduled)).await.unwrap();

        let response = checkout_work(State(state.clone()), Path(reg.worker.id)).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);

        let refreshed = state.store.get_task(task.id).await.unwrap();
        assert_eq!(refreshed.state, TaskState::Running);
        assert_eq!(refreshed.executor_handle, Some(reg.worker.id.to_string()));
    }

    #[tokio::test]
    async fn checkout_with_no_eligible_task_returns_no_content() {
        let state = test_state().await;
        let (_, Json(reg)) = register_worker(
            State(state.clone()),
            Json(RegisterWorkerRequest {
                name: "w1".into(),
                host: String::new(),
                group: "default".into(),
                runtime_tag: "bare".into(),
                capabilities: vec![],
            }),
        )
        .await
        .unwrap();

        let response = checkout_work(State(state.clone()), Path(reg.worker.id)).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn complete_report_finalizes_task_and_frees_worker() {
        let state = test_state().await;
        let (_, Json(reg)) = register_worker(
            State(state.clone()),
            Json(RegisterWorkerRequest {
                name: "w1".into(),
                host: String::new(),
                group: "default".into(),
                runtime_tag: "bare".into(),
                capabilities: vec![],
            }),
        )
        .await
        .unwrap();

        let mut task = sample_task(TaskState::Running);
        task.executor_handle = Some(reg.worker.id.to_string());
        let task = state.store.create_task(task).await.unwrap();

        let mut worker = state.store.get_worker(reg.worker.id).await.unwrap();
        worker.state = WorkerState::Busy;
        worker.current_task_id = Some(task.id);
        state.store.upsert_worker(worker).await.unwrap();

        let Json(completed) = report_complete(
            State(state.clone()),
            Path((reg.worker.id, task.id)),
            Json(TaskCompleteRequest {
                state: TaskState::Succeeded,
                exit_code: Some(0),
                retryable: true,
                stdout: Some("done".into()),
                stderr: Some(String::new()),
                outputs: json!({"result": "ok"}),
            }),
        )
        .await
        .unwrap();

        assert_eq!(completed.state, TaskState::Succeeded);
        assert_eq!(completed.outputs, json!({"result": "ok"}));

        let worker = state.store.get_worker(reg.worker.id).await.unwrap();
        assert_eq!(worker.state, WorkerState::Idle);
        assert!(worker.current_task_id.is_none());
    }

    #[tokio::test]
    async fn complete_report_from_wrong_worker_conflicts() {
        let state = test_state().await;
        let mut task = sample_task(TaskState::Running);
        task.executor_handle = Some(Uuid::now_v7().to_string());
        let task = state.store.create_task(task).await.unwrap();

        let err = report_complete(
            State(state.clone()),
            Path((Uuid::now_v7(), task.id)),
            Json(TaskCompleteRequest {
                state: TaskState::Succeeded,
                exit_code: Some(0),
                retryable: true,
                stdout: None,
                stderr: None,
                outputs: Value::Null,
            }),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn heartbeat_returns_drain_instruction_once_requested() {
        let state = test_state().await;
        let (_, Json(reg)) = register_worker(
            State(state.clone()),
            Json(RegisterWorkerRequest {
                name: "w1".into(),
                host: String::new(),
                group: "default".into(),
                runtime_tag: "bare".into(),
                capabilities: vec![],
            }),
        )
        .await
        .unwrap();

        let Json(resp) = heartbeat(
            State(state.clone()),
            Path(reg.worker.id),
            Json(HeartbeatRequest {
                state: Some(WorkerState::Draining),
            }),
        )
        .await
        .unwrap();

        assert_eq!(resp.instruction, HeartbeatInstruction::Drain);
    }

    #[tokio::test]
    async fn deregister_fails_held_task() {
        let state = test_state().await;
        let (_, Json(reg)) = register_worker(
            State(state.clone()),
            Json(RegisterWorkerRequest {
                name: "w1".into(),
                host: String::new(),
                group: "default".into(),
                runtime_tag: "bare".into(),
                capabilities: vec![],
            }),
        )
        .await
        .unwrap();

        let mut task = sample_task(TaskState::Running);
        task.executor_handle = Some(reg.worker.id.to_string());
        let task = state.store.create_task(task).await.unwrap();

        let mut worker = state.store.get_worker(reg.worker.id).await.unwrap();
        worker.current_task_id = Some(task.id);
        state.store.upsert_worker(worker).await.unwrap();

        let status = deregister_worker(State(state.clone()), Path(reg.worker.id)).await.unwrap();
        assert_eq!(status, axum::http::StatusCode::NO_CONTENT);

        let refreshed = state.store.get_task(task.id).await.unwrap();
        assert_eq!(refreshed.state, TaskState::Failed);
    }
}
