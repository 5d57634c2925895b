//! Co-founder Core - multi-agent content workflow engine.
//!
//! This crate contains the workflow engine, the agent catalogue, data
//! models and SQLite persistence. It has **no HTTP framework dependency** by
//! default, making it suitable for use in:
//!
//! - HTTP servers (via `cofounder-server`)
//! - CLI tools (via `cofounder-cli`)
//!
//! # Feature Flags
//!
//! - `axum` - Enables `IntoResponse` impl on `ServerError` for use in axum handlers.

pub mod db;
pub mod error;
pub mod models;
pub mod state;
pub mod store;
pub mod workflow;

// Convenience re-exports
pub use db::Database;
pub use error::{ServerError, WorkflowError};
pub use state::{AppState, AppStateInner};
