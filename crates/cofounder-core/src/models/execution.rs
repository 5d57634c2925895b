use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::workflow::context::{
    progress_percent, ExecutionContext, ExecutionHandle, ExecutionStatus, PhaseResult,
};
use crate::workflow::schema::WorkflowDefinition;

/// Persisted projection of one workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: String,
    pub workflow_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    pub status: ExecutionStatus,
    pub phase_results: Vec<PhaseResult>,
    pub duration_ms: u64,
    pub initial_input: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub completed_phases: u32,
    pub total_phases: u32,
    pub progress_percent: u32,
    pub tags: Vec<String>,
    /// Carries `workflowName` and the ordered `phases` list
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    /// The row written at launch, before any phase has run.
    pub fn pending(ctx: &ExecutionContext, workflow: &WorkflowDefinition) -> Self {
        let mut metadata = Map::new();
        metadata.insert("workflowName".into(), Value::String(workflow.name.clone()));
        metadata.insert(
            "phases".into(),
            Value::from(workflow.phase_names()),
        );
        Self {
            id: ctx.request_id.clone(),
            workflow_id: ctx.workflow_id.clone(),
            owner_id: ctx.owner_id.clone(),
            status: ExecutionStatus::Pending,
            phase_results: Vec::new(),
            duration_ms: 0,
            initial_input: ctx.initial_input.clone(),
            final_output: None,
            error_message: None,
            completed_phases: 0,
            total_phases: workflow.phases.len() as u32,
            progress_percent: 0,
            tags: ctx.tags.iter().cloned().collect(),
            metadata,
            created_at: ctx.started_at,
            updated_at: ctx.started_at,
            completed_at: None,
        }
    }

    /// The row written once a run has settled.
    pub fn from_context(ctx: &ExecutionContext, workflow: &WorkflowDefinition) -> Self {
        let completed = ctx.completed_phases();
        let total = workflow.phases.len();
        let error_message = match ctx.status {
            ExecutionStatus::Cancelled => Some("execution cancelled".to_string()),
            _ => ctx.first_error().map(str::to_string),
        };
        Self {
            status: ctx.status,
            phase_results: ctx.results.clone(),
            duration_ms: ctx.total_duration_ms(),
            final_output: Some(Value::Object(ctx.accumulated_output.clone())),
            error_message,
            completed_phases: completed as u32,
            progress_percent: progress_percent(completed, total),
            updated_at: Utc::now(),
            completed_at: ctx.completed_at,
            ..Self::pending(ctx, workflow)
        }
    }

    /// Phase names in execution order.
    pub fn phases(&self) -> Vec<String> {
        self.metadata
            .get("phases")
            .and_then(|v| v.as_array())
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| n.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn to_handle(&self) -> ExecutionHandle {
        ExecutionHandle {
            execution_id: self.id.clone(),
            workflow_id: self.workflow_id.clone(),
            status: self.status,
            started_at: self.created_at,
            phases: self.phases(),
            progress_percent: self.progress_percent,
            results: (self.status != ExecutionStatus::Pending).then(|| self.phase_results.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::schema::PhaseConfig;
    use serde_json::json;

    fn workflow() -> WorkflowDefinition {
        WorkflowDefinition::new(
            "blog",
            vec![
                PhaseConfig::new("research", "research"),
                PhaseConfig::new("draft", "creative"),
                PhaseConfig::new("review", "qa"),
                PhaseConfig::new("publish", "publishing"),
            ],
        )
    }

    #[test]
    fn test_record_from_finished_context() {
        let wf = workflow();
        let mut ctx = ExecutionContext::new(&wf, "exec-9", json!({"topic": "AI"}));
        for (name, ms) in [("research", 10), ("draft", 20), ("review", 30)] {
            ctx.record(PhaseResult::completed(name, json!({}), ms, 0, Map::new()));
            ctx.accumulated_output.insert(name.into(), json!({}));
        }
        ctx.record(PhaseResult::skipped("publish", "boom".into(), 5, 2));
        ctx.finish(ExecutionStatus::PartiallyCompleted);

        let record = ExecutionRecord::from_context(&ctx, &wf);
        assert_eq!(record.status, ExecutionStatus::PartiallyCompleted);
        assert_eq!(record.duration_ms, 65);
        assert_eq!(record.completed_phases, 3);
        assert_eq!(record.total_phases, 4);
        assert_eq!(record.progress_percent, 75);
        assert_eq!(record.phases(), wf.phase_names());
        assert!(record.error_message.is_none());
        assert!(record.completed_at.is_some());

        let handle = record.to_handle();
        assert_eq!(handle.execution_id, "exec-9");
        assert_eq!(handle.results.as_ref().map(|r| r.len()), Some(4));
    }

    #[test]
    fn test_pending_record_serializes_camel_case() {
        let wf = workflow();
        let ctx = ExecutionContext::new(&wf, "exec-1", json!({}));
        let value = serde_json::to_value(ExecutionRecord::pending(&ctx, &wf)).unwrap();
        assert_eq!(value["workflowId"], wf.id.as_str());
        assert_eq!(value["status"], "pending");
        assert_eq!(value["totalPhases"], 4);
        assert_eq!(value["metadata"]["workflowName"], "blog");
        assert!(value.get("finalOutput").is_none());
    }
}
