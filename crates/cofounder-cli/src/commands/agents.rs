//! `cofounder agents` - List the agents workflows can name.

use cofounder_core::state::AppState;
use serde_json::{json, Value};

use super::truncate;

/// Every registered agent, enriched with its specialist profile when one
/// exists.
pub fn catalogue(state: &AppState) -> Vec<Value> {
    state
        .coordinator
        .registry()
        .names()
        .into_iter()
        .map(|name| match state.specialists.get(&name) {
            Some(spec) => json!({
                "id": name,
                "name": spec.name,
                "description": spec.description,
                "role": spec.role,
                "modelTier": spec.model_tier,
            }),
            None => json!({ "id": name }),
        })
        .collect()
}

pub fn list(state: &AppState) -> Result<(), String> {
    let agents = catalogue(state);
    println!("{} agent(s) available", agents.len());
    println!();
    println!("┌──────────────────┬────────────────────┬────────────┬──────────┐");
    println!("│ ID               │ Name               │ Role       │ Tier     │");
    println!("├──────────────────┼────────────────────┼────────────┼──────────┤");

    for agent in &agents {
        let cell = |key: &str| agent[key].as_str().unwrap_or("-").to_string();
        println!(
            "│ {:<16} │ {:<18} │ {:<10} │ {:<8} │",
            truncate(&cell("id"), 16),
            truncate(&cell("name"), 18),
            truncate(&cell("role"), 10),
            truncate(&cell("modelTier"), 8),
        );
    }

    println!("└──────────────────┴────────────────────┴────────────┴──────────┘");
    Ok(())
}
