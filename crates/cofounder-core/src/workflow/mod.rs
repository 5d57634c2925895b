//! Workflow engine - sequential multi-phase agent pipelines.
//!
//! ```text
//! WorkflowDefinition ──► Coordinator ──► WorkflowExecutor ──► Phase (BoundPhase)
//!                            │                                     │
//!                     WorkflowRepository                  AgentRegistry / PhaseHandler
//!                      (ExecutionRecord)                           │
//!                                                        LlmAgent (HTTP) / custom agents
//! ```

pub mod agent;
pub mod agent_caller;
pub mod context;
pub mod coordinator;
pub mod executor;
pub mod phase;
pub mod schema;
pub mod specialist;

pub use agent::{AgentFactory, AgentHandle, AgentRegistry, AsyncEntrypoint, BlockingEntrypoint, Entrypoint};
pub use agent_caller::{LlmAgent, LlmCaller};
pub use context::{
    ExecutionContext, ExecutionHandle, ExecutionStatus, PhaseResult, PhaseStatus,
};
pub use coordinator::{Coordinator, CoordinatorConfig, ExecutionMode};
pub use executor::{ExecutionEvent, WorkflowExecutor};
pub use phase::{normalize_output, BoundPhase, Phase, PhaseHandler, PhaseOutput};
pub use schema::{PhaseConfig, WorkflowDefinition};
pub use specialist::{SpecialistDef, SpecialistLoader};
