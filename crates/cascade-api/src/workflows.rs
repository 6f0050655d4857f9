//! Workflow run/trigger/test/history routes

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use utoipa::ToSchema;
use uuid::Uuid;

use cascade_core::{Execution, ExecutionLog};
use cascade_storage::StoredWorkflow;

use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::AppState;

/// Response for run/test requests
#[derive(Debug, Serialize, ToSchema)]
pub struct RunResponse {
    pub execution_id: Uuid,
}

/// Response for trigger evaluation
#[derive(Debug, Serialize, ToSchema)]
pub struct TriggerResponse {
    pub executed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One execution with its log lines
#[derive(Debug, Serialize)]
pub struct HistoryEntry {
    pub execution: Execution,
    pub logs: Vec<ExecutionLog>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/workflows/:workflow_id/run", post(run_workflow))
        .route("/workflows/:workflow_id/trigger", post(trigger_workflow))
        .route("/workflows/:workflow_id/test", post(test_workflow))
        .route("/workflows/:workflow_id/history", get(get_history))
        .with_state(state)
}

/// Fetch a workflow and enforce ownership. A foreign workflow reads as
/// absent rather than forbidden.
async fn owned_workflow(
    state: &AppState,
    workflow_id: Uuid,
    user: CurrentUser,
) -> Result<StoredWorkflow, ApiError> {
    let workflow = state
        .store
        .get_workflow(workflow_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Workflow not found".into()))?;
    if workflow.user_id != user.0 {
        return Err(ApiError::NotFound("Workflow not found".into()));
    }
    Ok(workflow)
}

async fn start_execution(
    state: &AppState,
    workflow: &StoredWorkflow,
    trigger_data: Value,
    user: CurrentUser,
) -> Result<Uuid, ApiError> {
    workflow
        .definition
        .validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let execution = state
        .store
        .create_execution(workflow.id, trigger_data)
        .await?;
    state
        .scheduler
        .schedule_workflow_execution(workflow.id, Some(execution.id), None, Some(user.0))
        .await;
    Ok(execution.id)
}

/// POST /workflows/:workflow_id/run - Start an execution immediately
#[utoipa::path(
    post,
    path = "/workflows/{workflow_id}/run",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 200, description = "Execution scheduled", body = RunResponse),
        (status = 404, description = "Workflow not found")
    ),
    tag = "workflows"
)]
pub async fn run_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    user: CurrentUser,
    payload: Option<Json<Value>>,
) -> Result<Json<RunResponse>, ApiError> {
    let workflow = owned_workflow(&state, workflow_id, user).await?;
    let trigger_data = payload.map(|Json(v)| v).unwrap_or_else(|| json!({}));
    let execution_id = start_execution(&state, &workflow, trigger_data, user).await?;

    tracing::info!(%workflow_id, %execution_id, "workflow run requested");
    Ok(Json(RunResponse { execution_id }))
}

/// POST /workflows/:workflow_id/trigger - Start an execution if a trigger matches
#[utoipa::path(
    post,
    path = "/workflows/{workflow_id}/trigger",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 200, description = "Trigger evaluated", body = TriggerResponse),
        (status = 404, description = "Workflow not found")
    ),
    tag = "workflows"
)]
pub async fn trigger_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    user: CurrentUser,
    Json(trigger_data): Json<Value>,
) -> Result<Json<TriggerResponse>, ApiError> {
    let workflow = owned_workflow(&state, workflow_id, user).await?;

    if workflow.definition.matching_trigger(&trigger_data).is_none() {
        return Ok(Json(TriggerResponse {
            executed: false,
            execution_id: None,
            message: Some("No trigger conditions matched".into()),
        }));
    }

    let execution_id = start_execution(&state, &workflow, trigger_data, user).await?;
    Ok(Json(TriggerResponse {
        executed: true,
        execution_id: Some(execution_id),
        message: None,
    }))
}

/// POST /workflows/:workflow_id/test - Unconditional execution with a custom payload
#[utoipa::path(
    post,
    path = "/workflows/{workflow_id}/test",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 200, description = "Test execution scheduled", body = RunResponse),
        (status = 404, description = "Workflow not found")
    ),
    tag = "workflows"
)]
pub async fn test_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    user: CurrentUser,
    Json(body): Json<Value>,
) -> Result<Json<RunResponse>, ApiError> {
    let workflow = owned_workflow(&state, workflow_id, user).await?;
    let trigger_data = body.get("payload").cloned().unwrap_or_else(|| json!({}));
    let execution_id = start_execution(&state, &workflow, trigger_data, user).await?;
    Ok(Json(RunResponse { execution_id }))
}

/// GET /workflows/:workflow_id/history - Executions with their logs
#[utoipa::path(
    get,
    path = "/workflows/{workflow_id}/history",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 200, description = "Execution history"),
        (status = 404, description = "Workflow not found")
    ),
    tag = "workflows"
)]
pub async fn get_history(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    user: CurrentUser,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    let workflow = owned_workflow(&state, workflow_id, user).await?;

    let executions = state.store.list_executions(workflow.id).await?;
    let mut history = Vec::with_capacity(executions.len());
    for execution in executions {
        let logs = state.store.list_logs(execution.id).await?;
        history.push(HistoryEntry { execution, logs });
    }
    Ok(Json(history))
}
