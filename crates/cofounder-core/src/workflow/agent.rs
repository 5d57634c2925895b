//! Agent capabilities and the registry that instantiates them by name.
//!
//! Agents come with different calling conventions. An `AgentHandle`
//! carries up to three entrypoints (`execute`, `run`, `process`), each of
//! which may be async or blocking. The phase handler picks the first one
//! present; see [`crate::workflow::phase::PhaseHandler`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::WorkflowError;
use crate::workflow::agent_caller::{LlmAgent, LlmCaller};
use crate::workflow::specialist::SpecialistLoader;

/// An entrypoint that awaits its result.
///
/// `phase_name` is only supplied to the `execute` convention.
#[async_trait]
pub trait AsyncEntrypoint: Send + Sync {
    async fn call(&self, input: Value, phase_name: Option<String>) -> Result<Value, String>;
}

/// An entrypoint that blocks the calling thread. Always dispatched to the
/// blocking pool.
pub trait BlockingEntrypoint: Send + Sync {
    fn call(&self, input: Value, phase_name: Option<String>) -> Result<Value, String>;
}

#[derive(Clone)]
pub enum Entrypoint {
    Async(Arc<dyn AsyncEntrypoint>),
    Blocking(Arc<dyn BlockingEntrypoint>),
}

struct AsyncFn<F>(F);

#[async_trait]
impl<F, Fut> AsyncEntrypoint for AsyncFn<F>
where
    F: Fn(Value, Option<String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, String>> + Send + 'static,
{
    async fn call(&self, input: Value, phase_name: Option<String>) -> Result<Value, String> {
        (self.0)(input, phase_name).await
    }
}

struct BlockingFn<F>(F);

impl<F> BlockingEntrypoint for BlockingFn<F>
where
    F: Fn(Value, Option<String>) -> Result<Value, String> + Send + Sync,
{
    fn call(&self, input: Value, phase_name: Option<String>) -> Result<Value, String> {
        (self.0)(input, phase_name)
    }
}

impl Entrypoint {
    /// Wrap an async closure.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(Value, Option<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        Entrypoint::Async(Arc::new(AsyncFn(f)))
    }

    /// Wrap a synchronous closure.
    pub fn from_blocking<F>(f: F) -> Self
    where
        F: Fn(Value, Option<String>) -> Result<Value, String> + Send + Sync + 'static,
    {
        Entrypoint::Blocking(Arc::new(BlockingFn(f)))
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, Entrypoint::Blocking(_))
    }
}

/// The calling conventions an agent instance exposes.
#[derive(Clone, Default)]
pub struct AgentHandle {
    name: String,
    execute: Option<Entrypoint>,
    run: Option<Entrypoint>,
    process: Option<Entrypoint>,
}

impl AgentHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_execute(mut self, entrypoint: Entrypoint) -> Self {
        self.execute = Some(entrypoint);
        self
    }

    pub fn with_run(mut self, entrypoint: Entrypoint) -> Self {
        self.run = Some(entrypoint);
        self
    }

    pub fn with_process(mut self, entrypoint: Entrypoint) -> Self {
        self.process = Some(entrypoint);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// First present of execute → run → process.
    pub fn select(&self) -> Option<(&'static str, &Entrypoint)> {
        self.execute
            .as_ref()
            .map(|e| ("execute", e))
            .or_else(|| self.run.as_ref().map(|e| ("run", e)))
            .or_else(|| self.process.as_ref().map(|e| ("process", e)))
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("name", &self.name)
            .field("execute", &self.execute.is_some())
            .field("run", &self.run.is_some())
            .field("process", &self.process.is_some())
            .finish()
    }
}

/// Builds a fresh agent instance; may fail (missing credentials, bad config).
pub type AgentFactory = Arc<dyn Fn() -> Result<AgentHandle, String> + Send + Sync>;

/// Name → factory lookup. Built once at startup, then shared read-only.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    factories: HashMap<String, AgentFactory>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One LLM-backed agent per loaded specialist.
    pub fn with_specialists(loader: &SpecialistLoader) -> Self {
        let mut registry = Self::new();
        let caller = LlmCaller::new();
        for specialist in loader.all().values() {
            let specialist = specialist.clone();
            let caller = caller.clone();
            let name = specialist.id.clone();
            registry.register(name, move || {
                let agent = LlmAgent::new(specialist.clone(), caller.clone());
                Ok(AgentHandle::new(&specialist.id)
                    .with_execute(Entrypoint::Async(Arc::new(agent))))
            });
        }
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<AgentHandle, String> + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!(agent = %name, "Registered agent factory");
        self.factories.insert(name, Arc::new(factory));
    }

    /// Register a ready-made handle; each resolution hands out a clone.
    pub fn register_handle(&mut self, handle: AgentHandle) {
        let name = handle.name().to_string();
        self.register(name, move || Ok(handle.clone()));
    }

    /// Instantiate the named agent.
    pub fn resolve_agent(&self, name: &str) -> Result<AgentHandle, WorkflowError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| WorkflowError::AgentResolution {
                agent: name.to_string(),
                reason: "not registered".to_string(),
            })?;
        factory().map_err(|reason| WorkflowError::AgentResolution {
            agent: name.to_string(),
            reason,
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered agent names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_select_prefers_execute_then_run_then_process() {
        let process = Entrypoint::from_blocking(|_, _| Ok(json!("process")));
        let run = Entrypoint::from_blocking(|_, _| Ok(json!("run")));
        let execute = Entrypoint::from_async(|_, _| async { Ok(json!("execute")) });

        let only_process = AgentHandle::new("a").with_process(process.clone());
        assert_eq!(only_process.select().map(|(m, _)| m), Some("process"));

        let run_and_process = only_process.clone().with_run(run);
        assert_eq!(run_and_process.select().map(|(m, _)| m), Some("run"));

        let all = run_and_process.with_execute(execute);
        let (method, entry) = all.select().unwrap();
        assert_eq!(method, "execute");
        assert!(!entry.is_blocking());

        assert!(AgentHandle::new("empty").select().is_none());
    }

    #[test]
    fn test_resolve_unknown_agent() {
        let registry = AgentRegistry::new();
        let err = registry.resolve_agent("nonexistent_agent").unwrap_err();
        assert!(err.to_string().contains("nonexistent_agent"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_resolve_failing_factory() {
        let mut registry = AgentRegistry::new();
        registry.register("flaky", || Err("missing API key".to_string()));
        let err = registry.resolve_agent("flaky").unwrap_err();
        assert_eq!(
            err,
            WorkflowError::AgentResolution {
                agent: "flaky".into(),
                reason: "missing API key".into(),
            }
        );
    }

    #[test]
    fn test_registry_from_builtin_specialists() {
        let loader = SpecialistLoader::with_builtins();
        let registry = AgentRegistry::with_specialists(&loader);
        for name in ["research", "creative", "qa", "image", "publishing"] {
            assert!(registry.contains(name), "missing {}", name);
            let handle = registry.resolve_agent(name).unwrap();
            assert_eq!(handle.select().map(|(m, _)| m), Some("execute"));
        }
    }
}
