use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;

use crate::error::ServerError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}", get(get_execution))
        .route("/{id}/cancel", post(cancel_execution))
}

/// GET /api/executions/{id} - Live status, or the persisted record once evicted.
async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ServerError> {
    match state.coordinator.status(&id).await? {
        Some(handle) => Ok(Json(
            serde_json::to_value(&handle).map_err(|e| ServerError::Internal(e.to_string()))?,
        )),
        None => Err(ServerError::NotFound(format!("Execution {} not found", id))),
    }
}

async fn cancel_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ServerError> {
    if state.coordinator.cancel(&id).await {
        return Ok(Json(serde_json::json!({ "cancelled": true, "executionId": id })));
    }
    match state.coordinator.status(&id).await? {
        Some(handle) => Err(ServerError::Conflict(format!(
            "Execution {} is already {}",
            id, handle.status
        ))),
        None => Err(ServerError::NotFound(format!("Execution {} not found", id))),
    }
}
