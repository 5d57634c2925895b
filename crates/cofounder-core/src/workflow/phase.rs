//! Phase handler - adapts heterogeneous agents to one calling convention.
//!
//! Whatever an agent exposes (`execute`, `run` or `process`, async or
//! blocking), the executor only ever sees [`Phase::invoke`] returning a
//! normalized JSON object.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tokio_util::task::AbortOnDropHandle;

use crate::error::WorkflowError;
use crate::workflow::agent::{AgentHandle, AgentRegistry, Entrypoint};
use crate::workflow::schema::PhaseConfig;

/// Invokes agents, offloading blocking entrypoints to the blocking pool.
#[derive(Clone)]
pub struct PhaseHandler {
    blocking_permits: Arc<Semaphore>,
}

impl Default for PhaseHandler {
    fn default() -> Self {
        Self::new(8)
    }
}

impl PhaseHandler {
    /// `max_blocking_calls` bounds how many blocking agents run at once.
    pub fn new(max_blocking_calls: usize) -> Self {
        Self {
            blocking_permits: Arc::new(Semaphore::new(max_blocking_calls.max(1))),
        }
    }

    /// Call the agent's preferred entrypoint.
    ///
    /// Returns the raw output and the entrypoint used.
    pub async fn invoke(
        &self,
        agent: &AgentHandle,
        phase_name: &str,
        input: Value,
    ) -> Result<(Value, &'static str), WorkflowError> {
        let (method, entrypoint) = agent
            .select()
            .ok_or_else(|| WorkflowError::UnsupportedInterface(agent.name().to_string()))?;

        // Only `execute` receives the phase name.
        let phase_arg = (method == "execute").then(|| phase_name.to_string());

        let raw = match entrypoint {
            Entrypoint::Async(f) => {
                // Own task so a panic surfaces as a JoinError. Dropping the
                // guard (timeout, cancellation) aborts the agent.
                let f = f.clone();
                let task = AbortOnDropHandle::new(tokio::spawn(async move {
                    f.call(input, phase_arg).await
                }));
                match task.await {
                    Ok(result) => result,
                    Err(e) => Err(format!("agent panicked: {}", e)),
                }
            }
            Entrypoint::Blocking(f) => {
                let permit = self
                    .blocking_permits
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| WorkflowError::AgentExecution(e.to_string()))?;
                let f = f.clone();
                let joined = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    f.call(input, phase_arg)
                })
                .await;
                match joined {
                    Ok(result) => result,
                    Err(e) => Err(format!("agent panicked: {}", e)),
                }
            }
        };

        raw.map(|v| (v, method))
            .map_err(WorkflowError::AgentExecution)
    }
}

/// Coerce an agent's raw return value into a JSON object.
///
/// Objects pass through. Strings become `{phase, output, timestamp}`;
/// any other value is stringified first.
pub fn normalize_output(phase_name: &str, raw: Value) -> Value {
    let text = match raw {
        Value::Object(_) => return raw,
        Value::String(s) => s,
        other => other.to_string(),
    };
    serde_json::json!({
        "phase": phase_name,
        "output": text,
        "timestamp": Utc::now().to_rfc3339(),
    })
}

/// A normalized phase output plus bookkeeping for the phase result.
#[derive(Debug, Clone)]
pub struct PhaseOutput {
    pub output: Value,
    pub metadata: Map<String, Value>,
}

/// One runnable step of a workflow.
#[async_trait]
pub trait Phase: Send + Sync {
    fn config(&self) -> &PhaseConfig;

    /// Run one attempt. Timeouts and retries are the executor's concern.
    async fn invoke(&self, input: Value) -> Result<PhaseOutput, WorkflowError>;
}

/// A phase config bound to the registry that resolves its agent.
pub struct BoundPhase {
    config: PhaseConfig,
    registry: Arc<AgentRegistry>,
    handler: PhaseHandler,
}

impl BoundPhase {
    pub fn new(config: PhaseConfig, registry: Arc<AgentRegistry>, handler: PhaseHandler) -> Self {
        Self {
            config,
            registry,
            handler,
        }
    }
}

#[async_trait]
impl Phase for BoundPhase {
    fn config(&self) -> &PhaseConfig {
        &self.config
    }

    async fn invoke(&self, input: Value) -> Result<PhaseOutput, WorkflowError> {
        // A fresh instance per attempt.
        let agent = self.registry.resolve_agent(&self.config.agent)?;
        let (raw, method) = self.handler.invoke(&agent, &self.config.name, input).await?;

        let mut metadata = Map::new();
        metadata.insert("agent".into(), Value::String(self.config.agent.clone()));
        metadata.insert("entrypoint".into(), Value::String(method.to_string()));

        Ok(PhaseOutput {
            output: normalize_output(&self.config.name, raw),
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::{Duration, Instant};

    #[test]
    fn test_normalize_passes_objects_through() {
        let raw = json!({"content": "x", "score": 0.9});
        assert_eq!(normalize_output("qa", raw.clone()), raw);
    }

    #[test]
    fn test_normalize_wraps_strings() {
        let out = normalize_output("draft", json!("hello"));
        assert_eq!(out["phase"], "draft");
        assert_eq!(out["output"], "hello");
        assert!(chrono::DateTime::parse_from_rfc3339(out["timestamp"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_normalize_stringifies_other_values() {
        assert_eq!(normalize_output("p", json!(42))["output"], "42");
        assert_eq!(normalize_output("p", json!([1, 2]))["output"], "[1,2]");
        assert_eq!(normalize_output("p", Value::Null)["output"], "null");
    }

    #[tokio::test]
    async fn test_execute_receives_phase_name_run_does_not() {
        let handler = PhaseHandler::default();
        let echo = |input: Value, phase: Option<String>| -> Result<Value, String> {
            Ok(json!({"input": input, "phase": phase}))
        };

        let execute = AgentHandle::new("a").with_execute(Entrypoint::from_blocking(echo));
        let (out, method) = handler.invoke(&execute, "draft", json!(1)).await.unwrap();
        assert_eq!(method, "execute");
        assert_eq!(out["phase"], "draft");

        let run = AgentHandle::new("b").with_run(Entrypoint::from_async(move |i, p| async move {
            echo(i, p)
        }));
        let (out, method) = handler.invoke(&run, "draft", json!(1)).await.unwrap();
        assert_eq!(method, "run");
        assert_eq!(out["phase"], Value::Null);
    }

    #[tokio::test]
    async fn test_agent_without_entrypoints_is_unsupported() {
        let handler = PhaseHandler::default();
        let err = handler
            .invoke(&AgentHandle::new("mute"), "p", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err, WorkflowError::UnsupportedInterface("mute".into()));
    }

    #[tokio::test]
    async fn test_blocking_panic_becomes_execution_error() {
        let handler = PhaseHandler::new(1);
        let agent = AgentHandle::new("boom").with_process(Entrypoint::from_blocking(|_, _| {
            panic!("kaboom")
        }));
        let err = handler.invoke(&agent, "p", json!({})).await.unwrap_err();
        assert!(matches!(err, WorkflowError::AgentExecution(m) if m.contains("panicked")));
    }

    async fn crash(_: Value, _: Option<String>) -> Result<Value, String> {
        panic!("agent crashed")
    }

    #[tokio::test]
    async fn test_async_panic_becomes_execution_error() {
        let handler = PhaseHandler::default();
        let agent = AgentHandle::new("crashy").with_run(Entrypoint::from_async(crash));
        let err = handler.invoke(&agent, "p", json!({})).await.unwrap_err();
        assert!(
            matches!(&err, WorkflowError::AgentExecution(m) if m.contains("panicked")),
            "got {:?}",
            err
        );
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_timed_out_async_agent_is_aborted() {
        let finished = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = finished.clone();
        let agent = AgentHandle::new("slow").with_run(Entrypoint::from_async(move |_, _| {
            let flag = flag.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(json!("late"))
            }
        }));

        let handler = PhaseHandler::default();
        let attempt =
            tokio::time::timeout(Duration::from_millis(20), handler.invoke(&agent, "p", json!({})))
                .await;
        assert!(attempt.is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!finished.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_blocking_agent_leaves_scheduler_free() {
        let handler = PhaseHandler::default();
        let agent = AgentHandle::new("sleeper").with_process(Entrypoint::from_blocking(|_, _| {
            std::thread::sleep(Duration::from_millis(1500));
            Ok(json!("woke"))
        }));

        let started = Instant::now();
        let attempt = tokio::time::timeout(
            Duration::from_millis(100),
            handler.invoke(&agent, "p", json!({})),
        );
        let ticker = async {
            let mut ticks = 0;
            for _ in 0..5 {
                tokio::time::sleep(Duration::from_millis(10)).await;
                ticks += 1;
            }
            ticks
        };
        let (attempt, ticks) = tokio::join!(attempt, ticker);

        // One runtime thread: both only finish early if the sleep runs elsewhere.
        assert!(attempt.is_err(), "blocking attempt should time out");
        assert_eq!(ticks, 5);
        assert!(started.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_timed_out_blocking_call_holds_permit_until_it_returns() {
        let handler = PhaseHandler::new(1);
        let stuck = AgentHandle::new("stuck").with_process(Entrypoint::from_blocking(|_, _| {
            std::thread::sleep(Duration::from_millis(300));
            Ok(json!("done"))
        }));
        let quick = AgentHandle::new("quick")
            .with_process(Entrypoint::from_blocking(|_, _| Ok(json!("fast"))));

        let started = Instant::now();
        let attempt =
            tokio::time::timeout(Duration::from_millis(20), handler.invoke(&stuck, "p", json!({})))
                .await;
        assert!(attempt.is_err());

        // The only permit frees up once the abandoned thread returns.
        let (out, _) = handler.invoke(&quick, "p", json!({})).await.unwrap();
        assert_eq!(out, json!("fast"));
        assert!(started.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_bound_phase_records_agent_metadata() {
        let mut registry = AgentRegistry::new();
        registry.register_handle(
            AgentHandle::new("writer")
                .with_process(Entrypoint::from_blocking(|_, _| Ok(json!("draft text")))),
        );
        let phase = BoundPhase::new(
            PhaseConfig::new("draft", "writer"),
            Arc::new(registry),
            PhaseHandler::default(),
        );
        let out = phase.invoke(json!({})).await.unwrap();
        assert_eq!(out.output["output"], "draft text");
        assert_eq!(out.metadata["agent"], "writer");
        assert_eq!(out.metadata["entrypoint"], "process");
    }
}
