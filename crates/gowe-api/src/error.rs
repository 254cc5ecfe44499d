//! `ApiError` maps every failure the HTTP layer can surface onto the
//! taxonomy in spec.md §7, the way `control-plane`'s handlers map service
//! errors onto a `StatusCode` — except GoWe also returns a JSON body
//! (`api::common::ErrorResponse`) rather than a bare status, since a
//! workflow-ingress 400 needs to say *why* the CWL was rejected.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gowe_store::error::StoreError;

use crate::api::common::ErrorResponse;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Spec §7 "Validation": bad CWL, missing required inputs. Never
    /// creates a Task.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// Workflow deletion blocked by a referencing Submission (spec.md §6
    /// `DELETE /workflows/{id}` "remove if unreferenced").
    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scheduler(#[from] gowe_engine::error::SchedulerError),

    #[error(transparent)]
    Domain(#[from] gowe_core::DomainError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ApiError::Store(StoreError::WorkflowNotFound(id)) => {
                (StatusCode::NOT_FOUND, format!("workflow {id} not found"))
            }
            ApiError::Store(StoreError::SubmissionNotFound(id)) => {
                (StatusCode::NOT_FOUND, format!("submission {id} not found"))
            }
            ApiError::Store(StoreError::TaskNotFound(id)) => {
                (StatusCode::NOT_FOUND, format!("task {id} not found"))
            }
            ApiError::Store(StoreError::WorkerNotFound(id)) => {
                (StatusCode::NOT_FOUND, format!("worker {id} not found"))
            }
            ApiError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            ApiError::Scheduler(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            ApiError::Domain(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::Internal(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %message, "request failed");
        } else {
            tracing::warn!(status = %status, error = %message, "request rejected");
        }

        (status, Json(ErrorResponse::new(message))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
