//! `POST|GET|DELETE /v1/workflows[/:id]` (spec.md §6), following
//! `control-plane::api::agents`'s routes-function-plus-handlers shape.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use gowe_core::Workflow;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::common::ListResponse;
use crate::cwl;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// `name`/`description` travel alongside the raw CWL text per spec.md §6;
/// `description` has no home in [`Workflow`]'s data model (spec.md §3), so
/// it is accepted for API-contract compatibility and otherwise discarded.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateWorkflowRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Raw CWL v1.2 document, YAML or JSON.
    pub cwl: String,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/workflows", post(create_workflow).get(list_workflows))
        .route("/v1/workflows/:id", get(get_workflow).delete(delete_workflow))
        .with_state(state)
}

/// POST /v1/workflows
#[utoipa::path(
    post,
    path = "/v1/workflows",
    request_body = CreateWorkflowRequest,
    responses(
        (status = 201, description = "Workflow parsed and persisted", body = Workflow),
        (status = 400, description = "CWL document could not be parsed"),
    ),
    tag = "workflows"
)]
pub async fn create_workflow(
    State(state): State<AppState>,
    Json(req): Json<CreateWorkflowRequest>,
) -> ApiResult<(axum::http::StatusCode, Json<Workflow>)> {
    let workflow =
        cwl::parse_workflow(&req.cwl, req.name, Utc::now()).map_err(|e| ApiError::Validation(e.to_string()))?;
    let workflow = state.store.create_workflow(workflow).await?;
    Ok((axum::http::StatusCode::CREATED, Json(workflow)))
}

/// GET /v1/workflows
#[utoipa::path(
    get,
    path = "/v1/workflows",
    responses((status = 200, description = "All persisted workflows", body = ListResponse<Workflow>)),
    tag = "workflows"
)]
pub async fn list_workflows(State(state): State<AppState>) -> ApiResult<Json<ListResponse<Workflow>>> {
    let workflows = state.store.list_workflows().await?;
    Ok(Json(workflows.into()))
}

/// GET /v1/workflows/{id}
#[utoipa::path(
    get,
    path = "/v1/workflows/{id}",
    params(("id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 200, description = "Workflow found", body = Workflow),
        (status = 404, description = "No such workflow"),
    ),
    tag = "workflows"
)]
pub async fn get_workflow(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Workflow>> {
    Ok(Json(state.store.get_workflow(id).await?))
}

/// DELETE /v1/workflows/{id}
#[utoipa::path(
    delete,
    path = "/v1/workflows/{id}",
    params(("id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 204, description = "Workflow removed"),
        (status = 404, description = "No such workflow"),
        (status = 409, description = "Workflow still has referencing submissions"),
    ),
    tag = "workflows"
)]
pub async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<axum::http::StatusCode> {
    // touch the row first so a missing workflow 404s rather than silently
    // reporting zero referencing submissions.
    state.store.get_workflow(id).await?;

    let referencing = state.store.count_submissions_for_workflow(id).await?;
    if referencing > 0 {
        return Err(ApiError::Conflict(format!(
            "workflow {id} still has {referencing} submission(s) referencing it"
        )));
    }

    state.store.delete_workflow(id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
