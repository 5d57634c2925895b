//! Co-founder Server - HTTP surface of the content workflow platform.
//!
//! Provides a RESTful HTTP API via axum on top of `cofounder-core`:
//! workflow CRUD, sync/async execution, execution status polling and
//! cancellation, and the agent catalogue.
//!
//! This crate can be used standalone or embedded in other applications
//! (e.g. the `cofounder` CLI's `server` subcommand).

pub mod api;

// Core modules re-exported so handlers address them as `crate::*`.
pub use cofounder_core::{db, error, models, state, store, workflow};

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use self::db::Database;
use self::state::{AppState, AppStateInner};

/// Configuration for the co-founder backend server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3210,
            db_path: "cofounder.db".to_string(),
        }
    }
}

/// Create a shared `AppState` from a database path.
pub async fn create_app_state(db_path: &str) -> Result<AppState, String> {
    let db = Database::open(db_path).map_err(|e| format!("Failed to open database: {}", e))?;

    let state: AppState = Arc::new(AppStateInner::new(db));
    tracing::info!(
        agents = state.coordinator.registry().names().len(),
        "Agent registry ready"
    );
    Ok(state)
}

/// Start the backend server.
///
/// Returns the actual address the server is listening on.
pub async fn start_server(config: ServerConfig) -> Result<SocketAddr, String> {
    init_tracing();

    tracing::info!(
        "Starting co-founder server on {}:{}",
        config.host,
        config.port
    );

    let state = create_app_state(&config.db_path).await?;

    start_server_with_state(config, state).await
}

/// Install the `fmt` subscriber with an `EnvFilter` (`RUST_LOG`).
///
/// Returns false when a global subscriber is already set, e.g. by the CLI.
pub fn init_tracing() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cofounder_server=info,cofounder_core=info,tower_http=info".into()
            }),
        )
        .try_init()
        .is_ok()
}

/// Build the full router (API routes, health, CORS, request tracing).
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api::api_router())
        .route("/api/health", axum::routing::get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server with a pre-built `AppState`.
pub async fn start_server_with_state(
    config: ServerConfig,
    state: AppState,
) -> Result<SocketAddr, String> {
    let app = app(state);

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;

    let local_addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to get local address: {}", e))?;

    tracing::info!("Co-founder server listening on {}", local_addr);

    // Spawn the server in a background task
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok(local_addr)
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "server": "cofounder-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
