//! `cofounder workflow` - Run and validate YAML-defined workflows.
//!
//! Usage:
//!   cofounder workflow run blog-post.yaml --input '{"topic": "rust"}'
//!   cofounder workflow run blog-post.yaml --async
//!   cofounder workflow validate blog-post.yaml

use cofounder_core::state::AppState;
use cofounder_core::workflow::{
    ExecutionHandle, ExecutionMode, ExecutionStatus, PhaseStatus, WorkflowDefinition,
};
use serde_json::{json, Value};

use super::{print_json, truncate};

/// Execute a workflow file and print its results.
///
/// Fails when the run does not end in `completed`, so the process exit
/// code reflects the outcome.
pub async fn run(
    state: &AppState,
    file: &str,
    input: Option<&str>,
    run_async: bool,
) -> Result<(), String> {
    load_dotenv();

    let handle = if run_async {
        let pending = execute_file(state, file, input, ExecutionMode::Async).await?;
        println!("Launched execution {}", pending.execution_id);
        print_json(&to_json(&pending)?);
        state
            .coordinator
            .wait(&pending.execution_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("Execution '{}' vanished", pending.execution_id))?
    } else {
        execute_file(state, file, input, ExecutionMode::Sync).await?
    };

    print_summary(&handle);
    print_json(&to_json(&handle)?);

    match handle.status {
        ExecutionStatus::Completed => Ok(()),
        status => Err(format!(
            "Execution {} ended with status '{}'",
            handle.execution_id,
            status.as_str()
        )),
    }
}

/// Load, store and launch the workflow in `file`.
pub async fn execute_file(
    state: &AppState,
    file: &str,
    input: Option<&str>,
    mode: ExecutionMode,
) -> Result<ExecutionHandle, String> {
    let workflow = WorkflowDefinition::from_file(file)?;
    let input = parse_input(input)?;

    tracing::info!(
        workflow = %workflow.name,
        phases = workflow.phases.len(),
        "Loaded workflow from '{}'",
        file
    );

    // Validate before storing so a bad file leaves nothing behind.
    workflow.validate().map_err(|e| e.to_string())?;
    state
        .repository
        .save_workflow(&workflow)
        .await
        .map_err(|e| e.to_string())?;

    state
        .coordinator
        .execute(workflow, input, mode)
        .await
        .map_err(|e| e.to_string())
}

/// Check a workflow file without executing it.
pub fn validate(file: &str) -> Result<(), String> {
    let workflow = WorkflowDefinition::from_file(file)?;
    workflow.validate().map_err(|e| e.to_string())?;

    println!("✓ Workflow '{}' is valid", workflow.name);
    println!("  Phases: {}", workflow.phases.len());
    for (i, phase) in workflow.phases.iter().enumerate() {
        println!(
            "  {}. {} → agent '{}' (timeout {}s, retries {}{})",
            i + 1,
            phase.name,
            phase.agent,
            phase.timeout_seconds,
            phase.max_retries,
            if phase.skip_on_error {
                ", skip on error"
            } else if !phase.required {
                ", optional"
            } else {
                ""
            }
        );
    }
    Ok(())
}

/// `--input` is a JSON document; absent means an empty object.
pub fn parse_input(input: Option<&str>) -> Result<Value, String> {
    match input {
        None => Ok(json!({})),
        Some(raw) => serde_json::from_str(raw).map_err(|e| format!("Invalid --input JSON: {}", e)),
    }
}

fn to_json(handle: &ExecutionHandle) -> Result<Value, String> {
    serde_json::to_value(handle).map_err(|e| e.to_string())
}

fn print_summary(handle: &ExecutionHandle) {
    println!();
    println!(
        "Execution {}: {} ({}%)",
        handle.execution_id,
        handle.status.as_str(),
        handle.progress_percent
    );
    println!("┌──────────────────┬───────────┬──────────┬─────────┬──────────────────────────────┐");
    println!("│ Phase            │ Status    │ Duration │ Retries │ Error                        │");
    println!("├──────────────────┼───────────┼──────────┼─────────┼──────────────────────────────┤");
    for name in &handle.phases {
        let (status, duration, retries, error) = match handle.result(name) {
            Some(r) => (
                r.status.as_str(),
                format!("{}ms", r.duration_ms),
                r.retry_count.to_string(),
                r.error.clone().unwrap_or_default(),
            ),
            None => ("-", "-".to_string(), "-".to_string(), String::new()),
        };
        let marker = match handle.result(name).map(|r| r.status) {
            Some(PhaseStatus::Completed) => "✓",
            Some(PhaseStatus::Skipped) => "↷",
            Some(PhaseStatus::Failed) => "✗",
            None => " ",
        };
        println!(
            "│ {} {:<14} │ {:<9} │ {:>8} │ {:>7} │ {:<28} │",
            marker,
            truncate(name, 14),
            status,
            duration,
            retries,
            truncate(&error, 28),
        );
    }
    println!("└──────────────────┴───────────┴──────────┴─────────┴──────────────────────────────┘");
}

/// Load API credentials from `.env.local` / `.env` in the working
/// directory. Variables already set in the environment win.
fn load_dotenv() {
    for filename in &[".env.local", ".env"] {
        let path = std::path::Path::new(filename);
        let Ok(content) = std::fs::read_to_string(path) else {
            continue;
        };
        for (key, value) in parse_dotenv(&content) {
            if std::env::var(&key).is_err() {
                std::env::set_var(&key, &value);
            }
        }
        tracing::info!("Loaded environment from '{}'", filename);
    }
}

/// `KEY=VALUE` lines; comments, blanks and surrounding quotes are stripped.
fn parse_dotenv(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let value = value.trim();
            let unquoted = if value.len() >= 2
                && ((value.starts_with('"') && value.ends_with('"'))
                    || (value.starts_with('\'') && value.ends_with('\'')))
            {
                &value[1..value.len() - 1]
            } else {
                value
            };
            Some((key.trim().to_string(), unquoted.to_string()))
        })
        .collect()
}
