//! Job query and cancellation routes
//!
//! Authorization happens here, not in the scheduler: a job is only visible
//! to the user it was scheduled for.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use uuid::Uuid;

use cascade_core::Job;

use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::AppState;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/active", get(list_active_jobs))
        .route("/jobs/token", get(realtime_token))
        .route("/jobs/:job_id", get(get_job).delete(cancel_job))
        .with_state(state)
}

/// Serialize a job with the `job_id` alias older clients expect.
fn job_to_api(job: &Job) -> Value {
    let mut value = serde_json::to_value(job).unwrap_or_else(|_| json!({}));
    value["job_id"] = json!(job.id);
    value
}

fn owned_job(state: &AppState, job_id: Uuid, user: CurrentUser) -> Result<Job, ApiError> {
    let job = state
        .scheduler
        .get(job_id)
        .ok_or_else(|| ApiError::NotFound("Job not found".into()))?;
    if job.user_id != Some(user.0) {
        return Err(ApiError::Forbidden);
    }
    Ok(job)
}

/// GET /jobs - All jobs of the current user
#[utoipa::path(
    get,
    path = "/jobs",
    responses((status = 200, description = "Jobs for the current user")),
    tag = "jobs"
)]
pub async fn list_jobs(State(state): State<AppState>, user: CurrentUser) -> Json<Vec<Value>> {
    let jobs = state.scheduler.list_by_user(user.0);
    Json(jobs.iter().map(job_to_api).collect())
}

/// GET /jobs/active - Pending and running jobs of the current user
#[utoipa::path(
    get,
    path = "/jobs/active",
    responses((status = 200, description = "Active jobs for the current user")),
    tag = "jobs"
)]
pub async fn list_active_jobs(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Json<Vec<Value>> {
    let jobs = state.scheduler.list_by_user(user.0);
    Json(
        jobs.iter()
            .filter(|j| j.status.is_active())
            .map(job_to_api)
            .collect(),
    )
}

/// GET /jobs/token - Capability token for realtime job updates
#[utoipa::path(
    get,
    path = "/jobs/token",
    responses((status = 200, description = "Realtime token request")),
    tag = "jobs"
)]
pub async fn realtime_token(State(state): State<AppState>, user: CurrentUser) -> Json<Value> {
    let token = state.bus.bridge().token_request(&user.0.to_string()).await;
    Json(token)
}

/// GET /jobs/:job_id - One job, if owned by the current user
#[utoipa::path(
    get,
    path = "/jobs/{job_id}",
    params(("job_id" = Uuid, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job found"),
        (status = 403, description = "Job belongs to another user"),
        (status = 404, description = "Job not found")
    ),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    user: CurrentUser,
) -> Result<Json<Value>, ApiError> {
    let job = owned_job(&state, job_id, user)?;
    Ok(Json(job_to_api(&job)))
}

/// DELETE /jobs/:job_id - Cancel a pending job
#[utoipa::path(
    delete,
    path = "/jobs/{job_id}",
    params(("job_id" = Uuid, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job cancelled"),
        (status = 403, description = "Job belongs to another user"),
        (status = 404, description = "Job not found or not cancellable")
    ),
    tag = "jobs"
)]
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    user: CurrentUser,
) -> Result<Json<Value>, ApiError> {
    owned_job(&state, job_id, user)?;

    if !state.scheduler.cancel(job_id).await {
        return Err(ApiError::NotFound(
            "Job not found or cannot be cancelled".into(),
        ));
    }
    Ok(Json(json!({"message": "Job cancelled successfully"})))
}
