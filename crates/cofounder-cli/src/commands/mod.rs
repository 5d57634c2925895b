//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command and reuses
//! the cofounder-core domain logic through `AppState`.

pub mod agents;
pub mod executions;
pub mod server;
pub mod workflow;

use std::sync::Arc;

use cofounder_core::state::{AppState, AppStateInner};
use cofounder_core::workflow::{CoordinatorConfig, SpecialistLoader};
use cofounder_core::Database;

/// Build a shared `AppState` from a database path and an optional
/// directory of extra specialist definitions.
pub fn build_state(db_path: &str, specialist_dir: Option<&str>) -> Result<AppState, String> {
    let db = Database::open(db_path)
        .map_err(|e| format!("Failed to open database '{}': {}", db_path, e))?;

    let mut specialists = SpecialistLoader::with_builtins();
    let loaded = match specialist_dir {
        Some(dir) => specialists.load_dir(dir)?,
        None => specialists.load_default_dirs(),
    };
    tracing::debug!(loaded, "Specialists loaded from disk");

    Ok(Arc::new(AppStateInner::with_specialists(
        db,
        specialists,
        CoordinatorConfig::default(),
    )))
}

/// Like [`build_state`], but exits the process on failure.
pub fn init_state(db_path: &str, specialist_dir: Option<&str>) -> AppState {
    build_state(db_path, specialist_dir).unwrap_or_else(|e| {
        eprintln!("{}", e);
        std::process::exit(1);
    })
}

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

/// Clip `s` to `max` characters for table cells.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", head)
    }
}
