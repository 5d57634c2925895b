//! Core error types for the co-founder platform.
//!
//! `ServerError` is used by stores and the outer surfaces (HTTP, CLI).
//! When the `axum` feature is enabled, it also implements `IntoResponse`
//! so it can be used directly as an axum handler error type.
//!
//! `WorkflowError` is the taxonomy of things that can go wrong while
//! launching or running a workflow. Everything raised inside a phase is
//! converted into a `PhaseResult` by the executor; only `Validation`
//! reaches callers of the coordinator.

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    /// The named agent is not registered or its factory failed.
    #[error("Agent '{agent}' could not be resolved: {reason}")]
    AgentResolution { agent: String, reason: String },

    /// The agent exposes none of `execute`, `run` or `process`.
    #[error("Unsupported agent interface: '{0}' exposes none of execute/run/process")]
    UnsupportedInterface(String),

    /// The agent was invoked and reported an error (or panicked).
    #[error("Agent execution failed: {0}")]
    AgentExecution(String),

    #[error("Phase timed out after {0}s")]
    Timeout(u64),

    #[error("Execution cancelled")]
    Cancelled,

    /// Structural problem with a workflow definition, rejected before start.
    #[error("Invalid workflow: {0}")]
    Validation(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl WorkflowError {
    /// Whether another attempt of the same phase could succeed.
    ///
    /// Resolution and interface errors are permanent for the lifetime of a
    /// run, so they are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WorkflowError::AgentExecution(_) | WorkflowError::Timeout(_)
        )
    }
}

impl From<WorkflowError> for ServerError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::Validation(msg) => ServerError::BadRequest(msg),
            WorkflowError::Persistence(msg) => ServerError::Database(msg),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl From<ServerError> for WorkflowError {
    fn from(err: ServerError) -> Self {
        WorkflowError::Persistence(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// axum integration (opt-in via feature flag)
// ---------------------------------------------------------------------------

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let (status, message) = match &self {
            ServerError::Database(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            ServerError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ServerError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ServerError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ServerError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}
