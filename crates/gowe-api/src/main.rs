//! GoWe server entrypoint: loads `ApiConfig`, bootstraps the store,
//! executor registry, scheduler, and worker-queue dispatcher, then serves
//! the `/api/v1/...` routes (spec.md §6) until shutdown, mirroring
//! `control-plane::main`'s load-config -> bootstrap -> serve -> graceful-
//! shutdown shape.

mod api;
mod config;
mod cwl;
mod error;
mod state;
mod telemetry;

use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::ApiConfig;
use crate::state::{bootstrap, AppState};

#[derive(OpenApi)]
#[openapi(
    paths(
        api::workflows::create_workflow,
        api::workflows::list_workflows,
        api::workflows::get_workflow,
        api::workflows::delete_workflow,
        api::submissions::create_submission,
        api::submissions::list_submissions,
        api::submissions::get_submission,
        api::submissions::list_tasks,
        api::submissions::task_logs,
        api::submissions::cancel_submission,
        api::workers::register_worker,
        api::workers::deregister_worker,
        api::workers::heartbeat,
        api::workers::checkout_work,
        api::workers::report_status,
        api::workers::report_complete,
        api::health::health,
    ),
    components(schemas(
        gowe_core::Workflow,
        gowe_core::Submission,
        gowe_core::SubmissionState,
        gowe_core::Task,
        gowe_core::TaskState,
        gowe_core::Worker,
        gowe_core::WorkerState,
        gowe_core::HeartbeatInstruction,
        api::workflows::CreateWorkflowRequest,
        api::submissions::CreateSubmissionRequest,
        api::submissions::TaskLogsResponse,
        api::workers::RegisterWorkerRequest,
        api::workers::RegisterWorkerResponse,
        api::workers::HeartbeatRequest,
        api::workers::HeartbeatResponse,
        api::workers::TaskStatusRequest,
        api::workers::TaskCompleteRequest,
        api::health::HealthResponse,
        api::common::ErrorResponse,
    )),
    tags(
        (name = "workflows", description = "CWL ingress and Workflow CRUD"),
        (name = "submissions", description = "Submission lifecycle and Task inspection"),
        (name = "workers", description = "Remote worker-agent pull protocol"),
        (name = "health", description = "Liveness and executor availability"),
    )
)]
struct ApiDoc;

fn build_router(state: AppState, config: &ApiConfig) -> Router {
    let health_routes = Router::new()
        .route("/v1/health", axum::routing::get(api::health::health))
        .with_state(state.clone());

    let api_routes = Router::new()
        .merge(api::workflows::routes(state.clone()))
        .merge(api::submissions::routes(state.clone()))
        .merge(api::workers::routes(state.clone()))
        .merge(health_routes);

    let cors = if config.cors_allowed_origins.is_empty() {
        CorsLayer::new().allow_origin(AllowOrigin::any())
    } else {
        let origins: Vec<axum::http::HeaderValue> = config
            .cors_allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(origins)
    };

    Router::new()
        .nest(&config.api_prefix, api_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _telemetry = telemetry::init_telemetry(telemetry::TelemetryConfig::from_env());

    let config = ApiConfig::from_env()?;
    tracing::info!(listen_addr = %config.listen_addr, anonymous_access = config.anonymous_access, "starting gowe-api");

    let (state, background) = bootstrap(&config).await?;
    let app = build_router(state, &config);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    background.shutdown_all().await;
    Ok(())
}

/// Waits for SIGINT (ctrl-c) or, on unix, SIGTERM — the same dual-signal
/// shutdown trigger `control-plane::main` listens for before draining
/// in-flight requests.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received");
}
