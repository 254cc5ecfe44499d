//! `GET /health`, matching `control-plane::main`'s bare liveness handler but
//! widened per spec.md §6 to report per-executor availability.

use std::collections::HashMap;

use axum::extract::State;
use axum::Json;
use gowe_core::ExecutorType;
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub healthy: bool,
    pub uptime_seconds: u64,
    pub executors: HashMap<String, bool>,
}

/// GET /v1/health
#[utoipa::path(
    get,
    path = "/v1/health",
    responses((status = 200, description = "Server and executor-backend health", body = HealthResponse)),
    tag = "health"
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let executors = [
        ExecutorType::Local,
        ExecutorType::Container,
        ExecutorType::Bvbrc,
        ExecutorType::Worker,
    ]
    .into_iter()
    .map(|ty| (ty.as_str().to_string(), state.registry.get(ty).is_ok()))
    .collect();

    Json(HealthResponse {
        healthy: true,
        uptime_seconds: state.started_at.elapsed().as_secs(),
        executors,
    })
}
