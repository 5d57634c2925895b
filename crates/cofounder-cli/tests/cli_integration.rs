//! Integration tests for the cofounder-cli commands.
//!
//! These tests exercise the same code paths as the binary, using
//! in-memory or temporary SQLite databases for isolation.

use std::sync::Arc;

use cofounder_cli::commands;
use cofounder_core::state::{AppState, AppStateInner};
use cofounder_core::workflow::{
    AgentHandle, AgentRegistry, CoordinatorConfig, Entrypoint, ExecutionMode, ExecutionStatus,
    PhaseStatus, SpecialistLoader,
};
use cofounder_core::Database;
use serde_json::json;

/// An in-memory AppState with deterministic local agents.
fn test_state() -> AppState {
    let mut registry = AgentRegistry::new();
    registry.register_handle(AgentHandle::new("research").with_execute(
        Entrypoint::from_blocking(|input, phase| {
            Ok(json!({"phase": phase, "notes": format!("notes on {}", input["topic"])}))
        }),
    ));
    registry.register_handle(AgentHandle::new("creative").with_process(
        Entrypoint::from_blocking(|input, _| {
            Ok(json!(format!("article from {}", input["research"]["notes"])))
        }),
    ));
    registry.register_handle(AgentHandle::new("flaky").with_run(Entrypoint::from_blocking(
        |_, _| Err("upstream unavailable".to_string()),
    )));

    let db = Database::open_in_memory().expect("Failed to open in-memory database");
    Arc::new(AppStateInner::with_registry(
        db,
        SpecialistLoader::with_builtins(),
        Arc::new(registry),
        CoordinatorConfig::default(),
    ))
}

fn write_workflow(dir: &tempfile::TempDir, name: &str, yaml: &str) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, yaml).unwrap();
    path.to_string_lossy().to_string()
}

const BLOG_POST: &str = r#"
id: blog-post
name: Blog Post
phases:
  - name: research
    agent: research
  - name: draft
    agent: creative
    output_key: article
"#;

#[tokio::test]
async fn test_execute_file_sync_persists_everything() {
    let state = test_state();
    let dir = tempfile::tempdir().unwrap();
    let file = write_workflow(&dir, "blog.yaml", BLOG_POST);

    let handle = commands::workflow::execute_file(
        &state,
        &file,
        Some(r#"{"topic": "rust"}"#),
        ExecutionMode::Sync,
    )
    .await
    .unwrap();

    assert_eq!(handle.status, ExecutionStatus::Completed);
    assert_eq!(handle.progress_percent, 100);
    let draft = handle.result("draft").unwrap();
    assert_eq!(draft.status, PhaseStatus::Completed);
    let text = draft.output.as_ref().unwrap()["output"].as_str().unwrap();
    assert!(text.contains("notes on"), "got {}", text);

    // Both the definition and the execution record were stored.
    let stored = state.repository.get_workflow("blog-post").await.unwrap();
    assert!(stored.is_some());
    let record = state
        .repository
        .get_execution(&handle.execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert!(record.final_output.unwrap()["article"].is_object());

    commands::executions::get(&state, &handle.execution_id)
        .await
        .unwrap();
    commands::executions::list(&state, "blog-post").await.unwrap();
}

#[tokio::test]
async fn test_run_async_waits_for_completion() {
    let state = test_state();
    let dir = tempfile::tempdir().unwrap();
    let file = write_workflow(&dir, "blog.yaml", BLOG_POST);

    commands::workflow::run(&state, &file, Some(r#"{"topic": "async"}"#), true)
        .await
        .unwrap();

    let records = state.repository.list_executions("blog-post").await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn test_run_reports_failed_execution() {
    let state = test_state();
    let dir = tempfile::tempdir().unwrap();
    let file = write_workflow(
        &dir,
        "flaky.yaml",
        r#"
id: flaky
name: Flaky
phases:
  - name: fetch
    agent: flaky
    max_retries: 0
"#,
    );

    let err = commands::workflow::run(&state, &file, None, false)
        .await
        .unwrap_err();
    assert!(err.contains("failed"), "got {}", err);

    let records = state.repository.list_executions("flaky").await.unwrap();
    assert_eq!(records.len(), 1);
    let message = records[0].error_message.as_deref().unwrap();
    assert!(message.contains("upstream unavailable"), "got {}", message);
}

#[tokio::test]
async fn test_invalid_workflow_is_not_stored() {
    let state = test_state();
    let dir = tempfile::tempdir().unwrap();
    let file = write_workflow(&dir, "empty.yaml", "id: empty\nname: Empty\nphases: []\n");

    assert!(commands::workflow::validate(&file).is_err());
    let err = commands::workflow::execute_file(&state, &file, None, ExecutionMode::Sync)
        .await
        .unwrap_err();
    assert!(err.contains("no phases"), "got {}", err);
    assert!(state.repository.get_workflow("empty").await.unwrap().is_none());
}

#[tokio::test]
async fn test_bad_input_json_is_rejected() {
    let state = test_state();
    let dir = tempfile::tempdir().unwrap();
    let file = write_workflow(&dir, "blog.yaml", BLOG_POST);

    let err = commands::workflow::execute_file(&state, &file, Some("{oops"), ExecutionMode::Sync)
        .await
        .unwrap_err();
    assert!(err.contains("--input"));
}

#[test]
fn test_validate_accepts_well_formed_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_workflow(&dir, "blog.yaml", BLOG_POST);
    commands::workflow::validate(&file).unwrap();
}

#[tokio::test]
async fn test_get_unknown_execution() {
    let state = test_state();
    let err = commands::executions::get(&state, "nope").await.unwrap_err();
    assert!(err.contains("not found"));
}

#[test]
fn test_agent_catalogue_enriches_specialists() {
    let state = test_state();
    let agents = commands::agents::catalogue(&state);
    assert_eq!(agents.len(), 3);

    let research = agents.iter().find(|a| a["id"] == "research").unwrap();
    assert_eq!(research["role"], "RESEARCH");
    let flaky = agents.iter().find(|a| a["id"] == "flaky").unwrap();
    assert!(flaky.get("role").is_none());

    commands::agents::list(&state).unwrap();
}

#[test]
fn test_build_state_with_specialist_dir() {
    let dir = tempfile::tempdir().unwrap();
    let specialists = dir.path().join("specialists");
    std::fs::create_dir(&specialists).unwrap();
    std::fs::write(
        specialists.join("seo.yaml"),
        "id: seo\nname: SEO Editor\nrole: QA\nsystem_prompt: Tune headlines.\n",
    )
    .unwrap();
    let db_path = dir.path().join("cofounder.db");

    let specialist_dir = specialists.to_string_lossy().to_string();
    let state = commands::build_state(&db_path.to_string_lossy(), Some(specialist_dir.as_str()))
        .unwrap();

    assert!(state.coordinator.registry().contains("seo"));
    assert!(state.coordinator.registry().contains("research"));
    let seo = commands::agents::catalogue(&state)
        .into_iter()
        .find(|a| a["id"] == "seo")
        .unwrap();
    assert_eq!(seo["name"], "SEO Editor");
}

#[test]
fn test_build_state_missing_specialist_dir_fails() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("cofounder.db");
    let missing = dir.path().join("absent");
    let missing = missing.to_string_lossy().to_string();
    assert!(commands::build_state(&db_path.to_string_lossy(), Some(missing.as_str())).is_err());
}
