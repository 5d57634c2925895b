pub mod agents;
pub mod executions;
pub mod workflows;

use axum::Router;

use crate::state::AppState;

/// Build the complete API router with all sub-routes.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/api/workflows", workflows::router())
        .nest("/api/executions", executions::router())
        .nest("/api/agents", agents::router())
}
