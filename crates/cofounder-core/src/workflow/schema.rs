//! Schema types for workflow definitions.
//!
//! A workflow is an ordered list of phases, each bound to a named agent:
//!
//! ```yaml
//! name: "Blog Post"
//! description: "Research, draft and review a post"
//! owner_id: "user-42"
//! tags: [content, blog]
//!
//! phases:
//!   - name: research
//!     agent: research
//!     timeout_seconds: 120
//!
//!   - name: draft
//!     agent: creative
//!     max_retries: 1
//!     output_key: article
//!
//!   - name: review
//!     agent: qa
//!     quality_threshold: 0.8
//!     skip_on_error: true
//! ```

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::WorkflowError;

/// User-authored workflow blueprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique identifier (generated when absent)
    #[serde(default = "new_workflow_id")]
    pub id: String,

    /// Workflow name
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Ordered phases; declaration order is execution order
    pub phases: Vec<PhaseConfig>,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// Authoring user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn new_workflow_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Declarative description of one pipeline step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseConfig {
    /// Phase name (unique within the workflow, used for result lookup)
    pub name: String,

    /// Name of the agent capability to invoke
    pub agent: String,

    #[serde(default)]
    pub description: String,

    /// Bound on each individual attempt
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Record the phase as skipped and keep going when retries run out
    #[serde(default)]
    pub skip_on_error: bool,

    /// A failing required phase halts the execution
    #[serde(default = "default_required")]
    pub required: bool,

    /// Quality gate forwarded to the agent; the engine never evaluates it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_threshold: Option<f64>,

    /// Key in the accumulated output (defaults to the phase name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,

    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn default_timeout() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    2
}

fn default_required() -> bool {
    true
}

impl PhaseConfig {
    /// A phase with every policy at its default.
    pub fn new(name: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            agent: agent.into(),
            description: String::new(),
            timeout_seconds: default_timeout(),
            max_retries: default_max_retries(),
            skip_on_error: false,
            required: default_required(),
            quality_threshold: None,
            output_key: None,
            metadata: Map::new(),
        }
    }

    /// Where this phase's output lands in the accumulated output.
    pub fn output_key(&self) -> &str {
        self.output_key.as_deref().unwrap_or(&self.name)
    }
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, phases: Vec<PhaseConfig>) -> Self {
        let now = Utc::now();
        Self {
            id: new_workflow_id(),
            name: name.into(),
            description: String::new(),
            phases,
            tags: BTreeSet::new(),
            owner_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Parse a workflow definition from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, String> {
        serde_yaml::from_str(yaml).map_err(|e| format!("Failed to parse workflow YAML: {}", e))
    }

    /// Load a workflow definition from a file path.
    pub fn from_file(path: &str) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read workflow file '{}': {}", path, e))?;
        Self::from_yaml(&content)
    }

    /// Phase names in execution order.
    pub fn phase_names(&self) -> Vec<String> {
        self.phases.iter().map(|p| p.name.clone()).collect()
    }

    /// Structural checks run before a workflow is allowed to start.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.phases.is_empty() {
            return Err(WorkflowError::Validation(format!(
                "workflow '{}' has no phases",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for (i, phase) in self.phases.iter().enumerate() {
            if phase.name.trim().is_empty() {
                return Err(WorkflowError::Validation(format!(
                    "phase #{} has an empty name",
                    i + 1
                )));
            }
            if phase.agent.trim().is_empty() {
                return Err(WorkflowError::Validation(format!(
                    "phase '{}' does not name an agent",
                    phase.name
                )));
            }
            if phase.timeout_seconds == 0 {
                return Err(WorkflowError::Validation(format!(
                    "phase '{}' must have a positive timeout",
                    phase.name
                )));
            }
            if !seen.insert(phase.name.as_str()) {
                return Err(WorkflowError::Validation(format!(
                    "duplicate phase name '{}'",
                    phase.name
                )));
            }
        }

        Ok(())
    }
}
