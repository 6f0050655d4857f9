//! HTTP and websocket surface for the Cascade engine
//!
//! Routes the endpoints the core services: workflow run/trigger/test and
//! history, job queries and cancellation, the realtime token, and the
//! per-workflow execution event websocket. Authorization is enforced here
//! by comparing the authenticated user against resource owners.

pub mod auth;
pub mod config;
pub mod error;
pub mod jobs;
pub mod workflows;
pub mod ws;

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use cascade_engine::{EventBus, JobScheduler};
use cascade_storage::{Cache, ExecutionStore};

pub use config::Config;

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ExecutionStore>,
    pub cache: Arc<dyn Cache>,
    pub scheduler: JobScheduler,
    pub bus: Arc<EventBus>,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        workflows::run_workflow,
        workflows::trigger_workflow,
        workflows::test_workflow,
        workflows::get_history,
        jobs::list_jobs,
        jobs::list_active_jobs,
        jobs::realtime_token,
        jobs::get_job,
        jobs::cancel_job,
    ),
    components(schemas(workflows::RunResponse, workflows::TriggerResponse)),
    tags(
        (name = "workflows", description = "Workflow execution endpoints"),
        (name = "jobs", description = "Background job endpoints")
    ),
    info(
        title = "Cascade API",
        version = "0.1.0",
        description = "Workflow orchestration engine",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
pub struct ApiDoc;

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "message": "Workflow orchestration engine is running",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Assemble the full router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(workflows::routes(state.clone()))
        .merge(jobs::routes(state.clone()))
        .merge(ws::routes(state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
}
