//! Execution state threaded through one workflow run.
//!
//! The executor is the only writer of an `ExecutionContext` while a run is
//! in flight; once the status is terminal the context is handed to the
//! coordinator read-only.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::workflow::schema::{PhaseConfig, WorkflowDefinition};

/// Overall state of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    PartiallyCompleted,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::PartiallyCompleted => "partially_completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::PartiallyCompleted | Self::Cancelled
        )
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "partially_completed" => Ok(Self::PartiallyCompleted),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("Unknown execution status '{}'", other)),
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settled state of one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Completed,
    Failed,
    Skipped,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// Outcome of one phase execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase_name: String,
    pub status: PhaseStatus,
    /// Normalized agent output; set iff `status == completed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Last error; set for failed and skipped phases
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    /// Retries actually consumed (attempts - 1)
    pub retry_count: u32,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl PhaseResult {
    pub fn completed(
        phase_name: &str,
        output: Value,
        duration_ms: u64,
        retry_count: u32,
        metadata: Map<String, Value>,
    ) -> Self {
        Self {
            phase_name: phase_name.to_string(),
            status: PhaseStatus::Completed,
            output: Some(output),
            error: None,
            duration_ms,
            retry_count,
            metadata,
        }
    }

    pub fn failed(phase_name: &str, error: String, duration_ms: u64, retry_count: u32) -> Self {
        Self {
            phase_name: phase_name.to_string(),
            status: PhaseStatus::Failed,
            output: None,
            error: Some(error),
            duration_ms,
            retry_count,
            metadata: Map::new(),
        }
    }

    pub fn skipped(phase_name: &str, error: String, duration_ms: u64, retry_count: u32) -> Self {
        Self {
            status: PhaseStatus::Skipped,
            ..Self::failed(phase_name, error, duration_ms, retry_count)
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == PhaseStatus::Completed
    }
}

/// Mutable state of one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub workflow_id: String,
    /// Equal to the execution id
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    pub initial_input: Value,
    /// Phase outputs keyed by `PhaseConfig::output_key`
    pub accumulated_output: Map<String, Value>,
    /// Append-only, in execution order
    pub results: Vec<PhaseResult>,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl ExecutionContext {
    pub fn new(workflow: &WorkflowDefinition, request_id: &str, initial_input: Value) -> Self {
        Self {
            workflow_id: workflow.id.clone(),
            request_id: request_id.to_string(),
            owner_id: workflow.owner_id.clone(),
            initial_input,
            accumulated_output: Map::new(),
            results: Vec::new(),
            status: ExecutionStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            tags: workflow.tags.clone(),
        }
    }

    /// Look up a phase result by name.
    pub fn result(&self, phase_name: &str) -> Option<&PhaseResult> {
        self.results.iter().find(|r| r.phase_name == phase_name)
    }

    pub fn completed_phases(&self) -> usize {
        self.results.iter().filter(|r| r.is_completed()).count()
    }

    /// Sum of recorded phase durations.
    pub fn total_duration_ms(&self) -> u64 {
        self.results.iter().map(|r| r.duration_ms).sum()
    }

    /// The first failure message, if any phase failed.
    pub fn first_error(&self) -> Option<&str> {
        self.results
            .iter()
            .find(|r| r.status == PhaseStatus::Failed)
            .and_then(|r| r.error.as_deref())
    }

    /// Append a phase result. Terminal contexts are left untouched.
    pub(crate) fn record(&mut self, result: PhaseResult) {
        if self.status.is_terminal() {
            tracing::warn!(
                execution_id = %self.request_id,
                phase = %result.phase_name,
                "Ignoring phase result for a finished execution"
            );
            return;
        }
        self.results.push(result);
    }

    /// Move to a terminal status and stamp the completion time.
    pub(crate) fn finish(&mut self, status: ExecutionStatus) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    /// Build the payload handed to a phase's agent.
    ///
    /// Object inputs are flattened in, anything else sits under `"input"`.
    /// Earlier phases' outputs overlay it by output key.
    pub fn phase_input(&self, config: &PhaseConfig) -> Value {
        let mut input = match &self.initial_input {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("input".to_string(), other.clone());
                map
            }
        };
        for (key, value) in &self.accumulated_output {
            input.insert(key.clone(), value.clone());
        }
        if let Some(threshold) = config.quality_threshold {
            input.insert("quality_threshold".to_string(), Value::from(threshold));
        }
        Value::Object(input)
    }
}

/// `round(completed / total * 100)`, 0 for an empty workflow.
pub fn progress_percent(completed: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((completed as f64 / total as f64) * 100.0).round() as u32
}

/// What callers get back from `Coordinator::execute` and status polling.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionHandle {
    pub execution_id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub phases: Vec<String>,
    pub progress_percent: u32,
    /// Phase name → result, in execution order; absent until a run reports
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_results"
    )]
    pub results: Option<Vec<PhaseResult>>,
}

impl ExecutionHandle {
    /// The immediate answer for an execution that has not started yet.
    pub fn pending(ctx: &ExecutionContext, phases: Vec<String>) -> Self {
        Self {
            execution_id: ctx.request_id.clone(),
            workflow_id: ctx.workflow_id.clone(),
            status: ExecutionStatus::Pending,
            started_at: ctx.started_at,
            phases,
            progress_percent: 0,
            results: None,
        }
    }

    /// A full view of a context, including every recorded result.
    pub fn from_context(ctx: &ExecutionContext, phases: Vec<String>) -> Self {
        let progress = progress_percent(ctx.completed_phases(), phases.len());
        Self {
            execution_id: ctx.request_id.clone(),
            workflow_id: ctx.workflow_id.clone(),
            status: ctx.status,
            started_at: ctx.started_at,
            phases,
            progress_percent: progress,
            results: Some(ctx.results.clone()),
        }
    }

    pub fn result(&self, phase_name: &str) -> Option<&PhaseResult> {
        self.results
            .as_ref()
            .and_then(|rs| rs.iter().find(|r| r.phase_name == phase_name))
    }
}

fn serialize_results<S>(results: &Option<Vec<PhaseResult>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let results = results.as_deref().unwrap_or_default();
    let mut map = serializer.serialize_map(Some(results.len()))?;
    for result in results {
        map.serialize_entry(&result.phase_name, result)?;
    }
    map.end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(input: Value) -> ExecutionContext {
        let wf = WorkflowDefinition::new("t", vec![PhaseConfig::new("a", "x")]);
        ExecutionContext::new(&wf, "exec-1", input)
    }

    #[test]
    fn test_progress_percent_rounds() {
        assert_eq!(progress_percent(3, 4), 75);
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 67);
        assert_eq!(progress_percent(0, 0), 0);
        assert_eq!(progress_percent(5, 5), 100);
    }

    #[test]
    fn test_phase_input_overlays_accumulated_output() {
        let mut c = ctx(json!({"topic": "AI", "research": "stale"}));
        c.accumulated_output
            .insert("research".into(), json!({"facts": [1, 2]}));

        let mut config = PhaseConfig::new("draft", "creative");
        config.quality_threshold = Some(0.7);
        let input = c.phase_input(&config);

        assert_eq!(input["topic"], "AI");
        assert_eq!(input["research"], json!({"facts": [1, 2]}));
        assert_eq!(input["quality_threshold"], 0.7);
    }

    #[test]
    fn test_phase_input_wraps_scalar_input() {
        let c = ctx(json!("just a string"));
        let input = c.phase_input(&PhaseConfig::new("a", "x"));
        assert_eq!(input, json!({"input": "just a string"}));
    }

    #[test]
    fn test_terminal_context_is_not_mutated() {
        let mut c = ctx(json!({}));
        c.record(PhaseResult::completed("a", json!({}), 5, 0, Map::new()));
        c.finish(ExecutionStatus::Completed);
        c.record(PhaseResult::failed("b", "late".into(), 1, 0));
        c.finish(ExecutionStatus::Failed);

        assert_eq!(c.results.len(), 1);
        assert_eq!(c.status, ExecutionStatus::Completed);
        assert!(c.completed_at.is_some());
    }

    #[test]
    fn test_handle_serializes_results_as_ordered_map() {
        let mut c = ctx(json!({}));
        c.record(PhaseResult::completed("zeta", json!({"k": 1}), 5, 0, Map::new()));
        c.record(PhaseResult::skipped("alpha", "boom".into(), 2, 2));
        c.finish(ExecutionStatus::PartiallyCompleted);

        let handle = ExecutionHandle::from_context(&c, vec!["zeta".into(), "alpha".into()]);
        let text = serde_json::to_string(&handle).unwrap();
        assert!(text.find("\"zeta\"").unwrap() < text.find("\"alpha\"").unwrap());

        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["status"], "partially_completed");
        assert_eq!(value["progress_percent"], 50);
        assert_eq!(value["results"]["alpha"]["status"], "skipped");
        assert_eq!(value["results"]["alpha"]["error"], "boom");
    }

    #[test]
    fn test_pending_handle_omits_results() {
        let c = ctx(json!({}));
        let value = serde_json::to_value(ExecutionHandle::pending(&c, vec!["a".into()])).unwrap();
        assert_eq!(value["status"], "pending");
        assert_eq!(value["progress_percent"], 0);
        assert!(value.get("results").is_none());
    }
}
