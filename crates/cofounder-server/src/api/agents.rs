use axum::{extract::State, routing::get, Json, Router};
use serde_json::Value;

use crate::error::ServerError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_agents))
}

/// GET /api/agents - Every registered agent, with specialist details when known.
async fn list_agents(State(state): State<AppState>) -> Result<Json<Value>, ServerError> {
    let agents: Vec<Value> = state
        .coordinator
        .registry()
        .names()
        .into_iter()
        .map(|name| match state.specialists.get(&name) {
            Some(s) => serde_json::json!({
                "id": s.id,
                "name": s.name,
                "description": s.description,
                "role": s.role,
                "modelTier": s.model_tier,
            }),
            None => serde_json::json!({ "id": name, "name": name }),
        })
        .collect();
    Ok(Json(serde_json::json!({ "agents": agents })))
}
