//! `POST|GET /v1/submissions[/:id[/tasks[/:tid/logs]]]` and
//! `POST /v1/submissions/:id/cancel` (spec.md §6), following
//! `api::workflows`'s routes-function-plus-handlers shape.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use gowe_core::{ExecutorType, Submission, SubmissionState, Task, TaskLogs, TaskState};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::common::ListResponse;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Spec.md §6 `POST /submissions`: "workflow_id + inputs map + optional
/// labels + credential".
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateSubmissionRequest {
    pub workflow_id: Uuid,
    #[serde(default)]
    pub inputs: Value,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub submitted_by: Option<String>,
    /// Credential forwarded to executors at dispatch time (spec §3
    /// Submission, §4.2 phase 2).
    #[serde(default)]
    pub credential: Option<String>,
    #[serde(default)]
    pub credential_expires_at: Option<DateTime<Utc>>,
    /// Per-submission override of the server's default retry budget
    /// (ambient; spec.md §3 names `max_retries` as a Task attribute but
    /// leaves its source unspecified).
    #[serde(default)]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TaskLogsResponse {
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl From<TaskLogs> for TaskLogsResponse {
    fn from(logs: TaskLogs) -> Self {
        TaskLogsResponse {
            stdout: Some(logs.stdout),
            stderr: Some(logs.stderr),
        }
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/submissions", post(create_submission).get(list_submissions))
        .route("/v1/submissions/:id", get(get_submission))
        .route("/v1/submissions/:id/tasks", get(list_tasks))
        .route("/v1/submissions/:id/tasks/:tid/logs", get(task_logs))
        .route("/v1/submissions/:id/cancel", post(cancel_submission))
        .with_state(state)
}

/// POST /v1/submissions
///
/// Validates the workflow exists and every required workflow input is
/// either supplied or defaulted (spec §7 "Validation ... no task ever
/// created" on failure), then creates the Submission and one Task per
/// Step, all in PENDING (spec.md §6).
#[utoipa::path(
    post,
    path = "/v1/submissions",
    request_body = CreateSubmissionRequest,
    responses(
        (status = 201, description = "Submission created with one Task per Step", body = Submission),
        (status = 400, description = "Unknown workflow or missing required input"),
    ),
    tag = "submissions"
)]
pub async fn create_submission(
    State(state): State<AppState>,
    Json(req): Json<CreateSubmissionRequest>,
) -> ApiResult<(axum::http::StatusCode, Json<Submission>)> {
    let workflow = state.store.get_workflow(req.workflow_id).await?;

    let inputs_obj = req.inputs.as_object().cloned().unwrap_or_default();
    let mut missing = Vec::new();
    for decl in &workflow.inputs {
        if decl.required && decl.default.is_none() && !inputs_obj.contains_key(&decl.id) {
            missing.push(decl.id.clone());
        }
    }
    if !missing.is_empty() {
        return Err(ApiError::Validation(format!(
            "missing required workflow input(s): {}",
            missing.join(", ")
        )));
    }

    let now = Utc::now();
    let submission = Submission {
        id: Uuid::now_v7(),
        workflow_id: workflow.id,
        workflow_name: workflow.name.clone(),
        state: SubmissionState::Queued,
        inputs: req.inputs,
        outputs: Value::Null,
        labels: req.labels,
        submitted_by: req.submitted_by.unwrap_or_else(|| "anonymous".to_string()),
        credential: req.credential,
        credential_expires_at: req.credential_expires_at,
        created_at: now,
        updated_at: now,
        finished_at: None,
    };
    let submission = state.store.create_submission(submission).await?;

    let max_retries = req.max_retries.unwrap_or(state.default_max_retries);
    for step in &workflow.steps {
        let task = Task {
            id: Uuid::now_v7(),
            submission_id: submission.id,
            step_id: step.id.clone(),
            depends_on: step.depends_on.clone(),
            state: TaskState::Pending,
            executor_type: step.hints.executor_type.unwrap_or(state.default_executor_type),
            executor_handle: None,
            resolved_inputs: Value::Null,
            outputs: Value::Null,
            stdout: None,
            stderr: None,
            retry_count: 0,
            max_retries,
            last_error: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        state.store.create_task(task).await?;
    }

    Ok((axum::http::StatusCode::CREATED, Json(submission)))
}

/// GET /v1/submissions
#[utoipa::path(
    get,
    path = "/v1/submissions",
    responses((status = 200, description = "All persisted submissions", body = ListResponse<Submission>)),
    tag = "submissions"
)]
pub async fn list_submissions(State(state): State<AppState>) -> ApiResult<Json<ListResponse<Submission>>> {
    let submissions = state.store.list_submissions().await?;
    Ok(Json(submissions.into()))
}

/// GET /v1/submissions/{id}
#[utoipa::path(
    get,
    path = "/v1/submissions/{id}",
    params(("id" = Uuid, Path, description = "Submission ID")),
    responses(
        (status = 200, description = "Submission found", body = Submission),
        (status = 404, description = "No such submission"),
    ),
    tag = "submissions"
)]
pub async fn get_submission(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Submission>> {
    Ok(Json(state.store.get_submission(id).await?))
}

/// GET /v1/submissions/{id}/tasks
#[utoipa::path(
    get,
    path = "/v1/submissions/{id}/tasks",
    params(("id" = Uuid, Path, description = "Submission ID")),
    responses((status = 200, description = "Every Task of the Submission", body = ListResponse<Task>)),
    tag = "submissions"
)]
pub async fn list_tasks(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<ListResponse<Task>>> {
    // touch the row first so an unknown submission 404s rather than
    // silently returning an empty task list.
    state.store.get_submission(id).await?;
    let tasks = state.store.list_tasks_for_submission(id).await?;
    Ok(Json(tasks.into()))
}

/// GET /v1/submissions/{id}/tasks/{tid}/logs
#[utoipa::path(
    get,
    path = "/v1/submissions/{id}/tasks/{tid}/logs",
    params(
        ("id" = Uuid, Path, description = "Submission ID"),
        ("tid" = Uuid, Path, description = "Task ID"),
    ),
    responses(
        (status = 200, description = "Captured stdout/stderr", body = TaskLogsResponse),
        (status = 404, description = "No such submission or task"),
    ),
    tag = "submissions"
)]
pub async fn task_logs(
    State(state): State<AppState>,
    Path((submission_id, task_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<TaskLogsResponse>> {
    let task = state.store.get_task(task_id).await?;
    if task.submission_id != submission_id {
        return Err(ApiError::NotFound(format!(
            "task {task_id} does not belong to submission {submission_id}"
        )));
    }
    Ok(Json(TaskLogsResponse {
        stdout: task.stdout,
        stderr: task.stderr,
    }))
}

/// POST /v1/submissions/{id}/cancel
///
/// Transitions the Submission to CANCELLED and cascades to every
/// non-terminal Task (spec §3 Submission "`-> CANCELLED` on explicit user
/// request; also transitions any active Tasks to a terminal cancelled
/// state"). Cancellation is best-effort at the executor level: a backend
/// that cannot actually stop in-flight work still has its Task marked
/// CANCELLED (spec §4.5 `Cancel` "best-effort").
#[utoipa::path(
    post,
    path = "/v1/submissions/{id}/cancel",
    params(("id" = Uuid, Path, description = "Submission ID")),
    responses(
        (status = 200, description = "Submission cancelled", body = Submission),
        (status = 404, description = "No such submission"),
        (status = 409, description = "Submission already terminal"),
    ),
    tag = "submissions"
)]
pub async fn cancel_submission(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Submission>> {
    let mut submission = state.store.get_submission(id).await?;
    if submission.state.is_terminal() {
        return Err(ApiError::Conflict(format!("submission {id} is already terminal")));
    }

    let now = Utc::now();
    let active = state.store.list_active_tasks_for_submission(id).await?;
    for mut task in active {
        if task.executor_type != ExecutorType::Worker {
            if let (Ok(executor), Some(handle)) =
                (state.registry.get(task.executor_type), task.executor_handle.clone())
            {
                let _ = executor.cancel(&handle).await;
            }
        }
        if task.state.can_transition_to(TaskState::Cancelled) {
            task.transition_to(TaskState::Cancelled, now)
                .map_err(gowe_core::DomainError::from)?;
            state.store.update_task(task).await?;
        }
    }

    submission
        .transition_to(SubmissionState::Cancelled, now)
        .map_err(gowe_core::DomainError::from)?;
    let submission = state.store.update_submission(submission).await?;
    Ok(Json(submission))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gowe_core::workflow::{Step, StepHints, ToolDefinition, ToolRef};
    use gowe_engine::prelude::SchedulerConfig;
    use gowe_engine::prelude::WorkerQueueConfig;
    use gowe_executors::prelude::Registry;
    use gowe_engine::prelude::{Scheduler, WorkerQueue};
    use gowe_resolver::prelude::NullEvaluator;
    use gowe_store::memory::InMemoryStore;
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

    async fn seed_workflow(state: &AppState, required_input: bool) -> Uuid {
        let now = Utc::now();
        let workflow = gowe_core::Workflow {
            id: Uuid::now_v7(),
            name: "wf".into(),
            cwl_version: "v1.2".into(),
            raw_cwl: String::new(),
            inputs: vec![gowe_core::workflow::WorkflowInputDecl {
                id: "in".into(),
                type_: "string".into(),
                default: None,
                required: required_input,
            }],
            outputs: vec![],
            steps: vec![Step {
                id: "step1".into(),
                tool: ToolRef::Inline {
                    tool: ToolDefinition {
                        base_command: vec!["echo".into()],
                        inputs: vec![],
                        outputs: vec![],
                        success_codes: vec![],
                        temporary_fail_codes: vec![],
                    },
                },
                inputs: vec![],
                outputs: vec![],
                depends_on: vec![],
                hints: StepHints::default(),
            }],
            created_at: now,
        };
        state.store.create_workflow(workflow).await.unwrap().id
    }

    #[tokio::test]
    async fn create_submission_spawns_one_task_per_step() {
        let state = test_state().await;
        let workflow_id = seed_workflow(&state, false).await;

        let (status, Json(submission)) = create_submission(
            State(state.clone()),
            Json(CreateSubmissionRequest {
                workflow_id,
                inputs: Value::Object(Default::default()),
                labels: Default::default(),
                submitted_by: None,
                credential: None,
                credential_expires_at: None,
                max_retries: None,
            }),
        )
        .await
        .unwrap();

        assert_eq!(status, axum::http::StatusCode::CREATED);
        let tasks = state.store.list_tasks_for_submission(submission.id).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].state, TaskState::Pending);
    }

    #[tokio::test]
    async fn missing_required_input_rejects_without_creating_tasks() {
        let state = test_state().await;
        let workflow_id = seed_workflow(&state, true).await;

        let err = create_submission(
            State(state.clone()),
            Json(CreateSubmissionRequest {
                workflow_id,
                inputs: Value::Object(Default::default()),
                labels: Default::default(),
                submitted_by: None,
                credential: None,
                credential_expires_at: None,
                max_retries: None,
            }),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ApiError::Validation(_)));
        assert!(state.store.list_submissions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_cascades_to_active_tasks() {
        let state = test_state().await;
        let workflow_id = seed_workflow(&state, false).await;
        let (_, Json(submission)) = create_submission(
            State(state.clone()),
            Json(CreateSubmissionRequest {
                workflow_id,
                inputs: Value::Object(Default::default()),
                labels: Default::default(),
                submitted_by: None,
                credential: None,
                credential_expires_at: None,
                max_retries: None,
            }),
        )
        .await
        .unwrap();

        let Json(cancelled) = cancel_submission(State(state.clone()), Path(submission.id)).await.unwrap();
        assert_eq!(cancelled.state, SubmissionState::Cancelled);

        let tasks = state.store.list_tasks_for_submission(submission.id).await.unwrap();
        assert_eq!(tasks[0].state, TaskState::Cancelled);
    }

    #[tokio::test]
    async fn cancelling_a_terminal_submission_conflicts() {
        let state = test_state().await;
        let workflow_id = seed_workflow(&state, false).await;
        let (_, Json(submission)) = create_submission(
            State(state.clone()),
            Json(CreateSubmissionRequest {
                workflow_id,
                inputs: Value::Object(Default::default()),
                labels: Default::default(),
                submitted_by: None,
                credential: None,
                credential_expires_at: None,
                max_retries: None,
            }),
        )
        .await
        .unwrap();
        cancel_submission(State(state.clone()), Path(submission.id)).await.unwrap();

        let err = cancel_submission(State(state.clone()), Path(submission.id)).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }
}
