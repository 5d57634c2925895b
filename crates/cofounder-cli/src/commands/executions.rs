//! `cofounder executions` - Inspect persisted execution records.

use cofounder_core::state::AppState;

use super::{print_json, truncate};

pub async fn list(state: &AppState, workflow_id: &str) -> Result<(), String> {
    let records = state
        .repository
        .list_executions(workflow_id)
        .await
        .map_err(|e| e.to_string())?;

    if records.is_empty() {
        println!("No executions for workflow '{}'", workflow_id);
        return Ok(());
    }

    println!("┌──────────────────────────────────────┬───────────┬──────────┬────────────┐");
    println!("│ Execution                            │ Status    │ Progress │ Duration   │");
    println!("├──────────────────────────────────────┼───────────┼──────────┼────────────┤");
    for record in &records {
        println!(
            "│ {:<36} │ {:<9} │ {:>7}% │ {:>8}ms │",
            truncate(&record.id, 36),
            record.status.as_str(),
            record.progress_percent,
            record.duration_ms,
        );
    }
    println!("└──────────────────────────────────────┴───────────┴──────────┴────────────┘");
    Ok(())
}

/// Print one execution. The persisted record is preferred; the
/// coordinator's view covers runs whose record was never written.
pub async fn get(state: &AppState, execution_id: &str) -> Result<(), String> {
    if let Some(record) = state
        .repository
        .get_execution(execution_id)
        .await
        .map_err(|e| e.to_string())?
    {
        let value = serde_json::to_value(&record).map_err(|e| e.to_string())?;
        print_json(&value);
        return Ok(());
    }

    match state
        .coordinator
        .status(execution_id)
        .await
        .map_err(|e| e.to_string())?
    {
        Some(handle) => {
            let value = serde_json::to_value(&handle).map_err(|e| e.to_string())?;
            print_json(&value);
            Ok(())
        }
        None => Err(format!("Execution '{}' not found", execution_id)),
    }
}
