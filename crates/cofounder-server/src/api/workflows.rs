use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;

use crate::error::ServerError;
use crate::state::AppState;
use crate::workflow::{ExecutionMode, WorkflowDefinition};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_workflows).post(create_workflow))
        .route("/{id}", get(get_workflow).delete(delete_workflow))
        .route("/{id}/execute", post(execute_workflow))
        .route("/{id}/executions", get(list_executions))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    owner_id: Option<String>,
}

async fn list_workflows(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Value>, ServerError> {
    let workflows = state.repository.list_workflows(q.owner_id.as_deref()).await?;
    Ok(Json(serde_json::json!({ "workflows": workflows })))
}

async fn create_workflow(
    State(state): State<AppState>,
    Json(workflow): Json<WorkflowDefinition>,
) -> Result<(StatusCode, Json<Value>), ServerError> {
    workflow.validate()?;
    if state.repository.get_workflow(&workflow.id).await?.is_some() {
        return Err(ServerError::Conflict(format!(
            "Workflow {} already exists",
            workflow.id
        )));
    }
    state.repository.save_workflow(&workflow).await?;
    tracing::info!(workflow_id = %workflow.id, name = %workflow.name, "Workflow created");
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "workflow": workflow })),
    ))
}

async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ServerError> {
    match state.repository.get_workflow(&id).await? {
        Some(wf) => Ok(Json(serde_json::json!({ "workflow": wf }))),
        None => Err(ServerError::NotFound(format!("Workflow {} not found", id))),
    }
}

async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ServerError> {
    let deleted = state.repository.delete_workflow(&id).await?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    #[serde(default)]
    input: Value,
    /// Detach the run and answer immediately
    #[serde(default = "default_async", rename = "async")]
    run_async: bool,
}

fn default_async() -> bool {
    true
}

/// POST /api/workflows/{id}/execute - Start a run.
///
/// Async runs answer 202 with the pending handle; sync runs answer 200 with
/// every phase result.
async fn execute_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ExecuteRequest>,
) -> Result<(StatusCode, Json<Value>), ServerError> {
    let workflow = state
        .repository
        .get_workflow(&id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("Workflow {} not found", id)))?;

    let mode = if body.run_async {
        ExecutionMode::Async
    } else {
        ExecutionMode::Sync
    };
    let handle = state.coordinator.execute(workflow, body.input, mode).await?;

    let status = match mode {
        ExecutionMode::Async => StatusCode::ACCEPTED,
        ExecutionMode::Sync => StatusCode::OK,
    };
    let body = serde_json::to_value(&handle).map_err(|e| ServerError::Internal(e.to_string()))?;
    Ok((status, Json(body)))
}

async fn list_executions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ServerError> {
    let executions = state.repository.list_executions(&id).await?;
    Ok(Json(serde_json::json!({ "executions": executions })))
}
