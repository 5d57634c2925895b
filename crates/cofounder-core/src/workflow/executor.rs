//! Workflow Executor - runs the phases of one execution in order.
//!
//! The executor:
//! 1. Builds each phase's input from the initial input and earlier outputs
//! 2. Invokes the phase, bounding every attempt by its timeout
//! 3. Retries retryable failures immediately, up to `max_retries`
//! 4. Applies the phase's failure policy (skip, halt, or continue)
//! 5. Derives the final execution status from the recorded results
//!
//! No phase error escapes [`WorkflowExecutor::run`]; everything ends up in a
//! `PhaseResult`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::WorkflowError;
use crate::workflow::agent::AgentRegistry;
use crate::workflow::context::{ExecutionContext, ExecutionStatus, PhaseResult};
use crate::workflow::phase::{BoundPhase, Phase, PhaseHandler, PhaseOutput};
use crate::workflow::schema::WorkflowDefinition;

/// Progress notifications published while a run is in flight.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PhaseStarted {
        execution_id: String,
        phase: String,
        index: usize,
    },
    PhaseFinished {
        execution_id: String,
        result: PhaseResult,
    },
    Finished {
        execution_id: String,
        status: ExecutionStatus,
    },
}

/// The workflow executor engine.
pub struct WorkflowExecutor {
    phases: Vec<Arc<dyn Phase>>,
    events: Option<mpsc::UnboundedSender<ExecutionEvent>>,
    cancel: CancellationToken,
}

impl WorkflowExecutor {
    pub fn new(phases: Vec<Arc<dyn Phase>>) -> Self {
        Self {
            phases,
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Bind every phase of a workflow to the registry.
    pub fn bind(
        workflow: &WorkflowDefinition,
        registry: Arc<AgentRegistry>,
        handler: PhaseHandler,
    ) -> Self {
        let phases = workflow
            .phases
            .iter()
            .map(|config| {
                Arc::new(BoundPhase::new(
                    config.clone(),
                    registry.clone(),
                    handler.clone(),
                )) as Arc<dyn Phase>
            })
            .collect();
        Self::new(phases)
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn phase_count(&self) -> usize {
        self.phases.len()
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(tx) = &self.events {
            // Nobody listening is fine.
            let _ = tx.send(event);
        }
    }

    /// Run every phase against `ctx` and return it in a terminal state.
    pub async fn run(&self, mut ctx: ExecutionContext) -> ExecutionContext {
        let execution_id = ctx.request_id.clone();
        ctx.status = ExecutionStatus::Running;
        tracing::info!(
            execution_id = %execution_id,
            workflow_id = %ctx.workflow_id,
            phases = self.phases.len(),
            "Workflow execution started"
        );

        let mut halted = false;
        let mut cancelled = false;

        for (index, phase) in self.phases.iter().enumerate() {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let config = phase.config();
            self.emit(ExecutionEvent::PhaseStarted {
                execution_id: execution_id.clone(),
                phase: config.name.clone(),
                index,
            });

            let input = ctx.phase_input(config);
            let started = Instant::now();
            let (outcome, retries) = self.attempt_with_retries(phase.as_ref(), input).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let result = match outcome {
                Ok(PhaseOutput {
                    output,
                    mut metadata,
                }) => {
                    metadata.insert("attempts".into(), Value::from(retries + 1));
                    ctx.accumulated_output
                        .insert(config.output_key().to_string(), output.clone());
                    tracing::info!(
                        execution_id = %execution_id,
                        phase = %config.name,
                        duration_ms,
                        retries,
                        "Phase completed"
                    );
                    PhaseResult::completed(&config.name, output, duration_ms, retries, metadata)
                }
                Err(WorkflowError::Cancelled) => {
                    cancelled = true;
                    tracing::warn!(execution_id = %execution_id, phase = %config.name, "Phase cancelled");
                    PhaseResult::failed(
                        &config.name,
                        "execution cancelled".to_string(),
                        duration_ms,
                        retries,
                    )
                }
                Err(e) if config.skip_on_error => {
                    tracing::warn!(
                        execution_id = %execution_id,
                        phase = %config.name,
                        error = %e,
                        "Phase failed, skipping"
                    );
                    PhaseResult::skipped(&config.name, e.to_string(), duration_ms, retries)
                }
                Err(e) => {
                    halted = config.required;
                    tracing::error!(
                        execution_id = %execution_id,
                        phase = %config.name,
                        error = %e,
                        required = config.required,
                        "Phase failed"
                    );
                    PhaseResult::failed(&config.name, e.to_string(), duration_ms, retries)
                }
            };

            self.emit(ExecutionEvent::PhaseFinished {
                execution_id: execution_id.clone(),
                result: result.clone(),
            });
            ctx.record(result);

            if cancelled || halted {
                break;
            }
        }

        let status = if cancelled {
            ExecutionStatus::Cancelled
        } else if halted {
            ExecutionStatus::Failed
        } else if ctx.completed_phases() == self.phases.len() {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::PartiallyCompleted
        };
        ctx.finish(status);

        tracing::info!(
            execution_id = %execution_id,
            status = %ctx.status,
            completed = ctx.completed_phases(),
            total = self.phases.len(),
            duration_ms = ctx.total_duration_ms(),
            "Workflow execution finished"
        );
        self.emit(ExecutionEvent::Finished {
            execution_id,
            status: ctx.status,
        });
        ctx
    }

    /// Returns the final outcome and the number of retries consumed.
    async fn attempt_with_retries(
        &self,
        phase: &dyn Phase,
        input: Value,
    ) -> (Result<PhaseOutput, WorkflowError>, u32) {
        let config = phase.config();
        let limit = Duration::from_secs(config.timeout_seconds);
        let mut retries = 0;

        loop {
            let attempt = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(WorkflowError::Cancelled),
                res = tokio::time::timeout(limit, phase.invoke(input.clone())) => match res {
                    Ok(inner) => inner,
                    Err(_) => Err(WorkflowError::Timeout(config.timeout_seconds)),
                },
            };

            match attempt {
                Ok(output) => return (Ok(output), retries),
                Err(e) if e.is_retryable() && retries < config.max_retries => {
                    retries += 1;
                    tracing::warn!(
                        phase = %config.name,
                        attempt = retries,
                        error = %e,
                        "Phase attempt failed, retrying"
                    );
                }
                Err(e) => return (Err(e), retries),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::{json, Map};

    use crate::workflow::agent::{AgentHandle, Entrypoint};
    use crate::workflow::context::PhaseStatus;
    use crate::workflow::schema::PhaseConfig;

    type Script = dyn Fn(u32, &Value) -> Result<Value, WorkflowError> + Send + Sync;

    /// A phase whose behaviour is scripted per attempt number.
    struct ScriptedPhase {
        config: PhaseConfig,
        attempts: AtomicU32,
        log: Arc<Mutex<Vec<String>>>,
        script: Box<Script>,
    }

    impl ScriptedPhase {
        fn new(
            config: PhaseConfig,
            log: &Arc<Mutex<Vec<String>>>,
            script: impl Fn(u32, &Value) -> Result<Value, WorkflowError> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                config,
                attempts: AtomicU32::new(0),
                log: log.clone(),
                script: Box::new(script),
            })
        }

        fn ok(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Phase> {
            let n = name.to_string();
            Self::new(PhaseConfig::new(name, "test"), log, move |_, _| {
                Ok(json!({ "from": n }))
            })
        }

        fn failing(config: PhaseConfig, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Phase> {
            Self::new(config, log, |_, _| {
                Err(WorkflowError::AgentExecution("boom".into()))
            })
        }
    }

    #[async_trait]
    impl Phase for ScriptedPhase {
        fn config(&self) -> &PhaseConfig {
            &self.config
        }

        async fn invoke(&self, input: Value) -> Result<PhaseOutput, WorkflowError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            self.log.lock().unwrap().push(self.config.name.clone());
            (self.script)(attempt, &input).map(|output| PhaseOutput {
                output,
                metadata: Map::new(),
            })
        }
    }

    fn context(phases: &[&str]) -> ExecutionContext {
        let wf = WorkflowDefinition::new(
            "test",
            phases.iter().map(|p| PhaseConfig::new(*p, "test")).collect(),
        );
        ExecutionContext::new(&wf, "exec-1", json!({"topic": "AI"}))
    }

    fn log() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn test_phases_run_in_declaration_order() {
        let log = log();
        let exec = WorkflowExecutor::new(vec![
            ScriptedPhase::ok("research", &log),
            ScriptedPhase::ok("draft", &log),
            ScriptedPhase::ok("review", &log),
        ]);
        let ctx = exec.run(context(&["research", "draft", "review"])).await;

        assert_eq!(*log.lock().unwrap(), vec!["research", "draft", "review"]);
        let names: Vec<_> = ctx.results.iter().map(|r| r.phase_name.as_str()).collect();
        assert_eq!(names, vec!["research", "draft", "review"]);
        assert_eq!(ctx.status, ExecutionStatus::Completed);
        assert!(ctx.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_outputs_flow_to_later_phases() {
        let log = log();
        let mut draft = PhaseConfig::new("draft", "test");
        draft.output_key = Some("article".into());
        let exec = WorkflowExecutor::new(vec![
            ScriptedPhase::ok("research", &log),
            ScriptedPhase::new(draft, &log, |_, input| {
                Ok(json!({ "saw": input["research"]["from"], "topic": input["topic"] }))
            }) as Arc<dyn Phase>,
        ]);
        let ctx = exec.run(context(&["research", "draft"])).await;

        assert_eq!(ctx.accumulated_output["article"]["saw"], "research");
        assert_eq!(ctx.accumulated_output["article"]["topic"], "AI");
        assert!(ctx.accumulated_output.contains_key("research"));
    }

    #[tokio::test]
    async fn test_retry_bound_is_max_retries_plus_one() {
        let log = log();
        let phase = ScriptedPhase::new(PhaseConfig::new("flaky", "test"), &log, |_, _| {
            Err(WorkflowError::AgentExecution("boom".into()))
        });
        let exec = WorkflowExecutor::new(vec![phase.clone() as Arc<dyn Phase>]);
        let ctx = exec.run(context(&["flaky"])).await;

        assert_eq!(phase.attempts.load(Ordering::SeqCst), 3);
        let result = ctx.result("flaky").unwrap();
        assert_eq!(result.status, PhaseStatus::Failed);
        assert_eq!(result.retry_count, 2);
        assert!(result.error.as_deref().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_success_after_retry() {
        let log = log();
        let phase = ScriptedPhase::new(PhaseConfig::new("flaky", "test"), &log, |attempt, _| {
            if attempt < 2 {
                Err(WorkflowError::AgentExecution("transient".into()))
            } else {
                Ok(json!("ok"))
            }
        });
        let ctx = WorkflowExecutor::new(vec![phase as Arc<dyn Phase>])
            .run(context(&["flaky"]))
            .await;

        let result = ctx.result("flaky").unwrap();
        assert!(result.is_completed());
        assert_eq!(result.retry_count, 1);
        assert_eq!(result.metadata["attempts"], 2);
        assert_eq!(ctx.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn test_required_failure_halts() {
        let log = log();
        let exec = WorkflowExecutor::new(vec![
            ScriptedPhase::ok("research", &log),
            ScriptedPhase::failing(PhaseConfig::new("draft", "test"), &log),
            ScriptedPhase::ok("review", &log),
        ]);
        let ctx = exec.run(context(&["research", "draft", "review"])).await;

        assert_eq!(ctx.status, ExecutionStatus::Failed);
        assert_eq!(ctx.results.len(), 2);
        assert!(ctx.result("review").is_none());
        assert!(!log.lock().unwrap().contains(&"review".to_string()));
        assert_eq!(ctx.first_error(), Some("Agent execution failed: boom"));
    }

    #[tokio::test]
    async fn test_skip_on_error_continues_as_partial() {
        let log = log();
        let mut skippable = PhaseConfig::new("image", "test");
        skippable.skip_on_error = true;
        let exec = WorkflowExecutor::new(vec![
            ScriptedPhase::ok("research", &log),
            ScriptedPhase::failing(skippable, &log),
            ScriptedPhase::ok("publish", &log),
        ]);
        let ctx = exec.run(context(&["research", "image", "publish"])).await;

        let skipped = ctx.result("image").unwrap();
        assert_eq!(skipped.status, PhaseStatus::Skipped);
        assert!(skipped.error.is_some());
        assert!(skipped.output.is_none());
        assert!(ctx.result("publish").unwrap().is_completed());
        assert_eq!(ctx.status, ExecutionStatus::PartiallyCompleted);
    }

    #[tokio::test]
    async fn test_optional_failure_continues_as_partial() {
        let log = log();
        let mut optional = PhaseConfig::new("qa", "test");
        optional.required = false;
        optional.max_retries = 0;
        let exec = WorkflowExecutor::new(vec![
            ScriptedPhase::failing(optional, &log),
            ScriptedPhase::ok("publish", &log),
        ]);
        let ctx = exec.run(context(&["qa", "publish"])).await;

        assert_eq!(ctx.result("qa").unwrap().status, PhaseStatus::Failed);
        assert!(ctx.result("publish").unwrap().is_completed());
        assert_eq!(ctx.status, ExecutionStatus::PartiallyCompleted);
    }

    #[tokio::test]
    async fn test_unresolvable_agent_fails_fast() {
        let workflow = WorkflowDefinition::new(
            "missing",
            vec![PhaseConfig::new("only", "nonexistent_agent")],
        );
        let exec = WorkflowExecutor::bind(
            &workflow,
            Arc::new(AgentRegistry::new()),
            PhaseHandler::default(),
        );
        let ctx = exec
            .run(ExecutionContext::new(&workflow, "exec-2", json!({})))
            .await;

        assert_eq!(ctx.status, ExecutionStatus::Failed);
        assert_eq!(ctx.results.len(), 1);
        let result = &ctx.results[0];
        assert_eq!(result.retry_count, 0);
        assert!(result.error.as_deref().unwrap().contains("nonexistent_agent"));
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let mut registry = AgentRegistry::new();
        registry.register_handle(AgentHandle::new("slow").with_execute(Entrypoint::from_async(
            |_, _| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(json!("late"))
            },
        )));
        let mut config = PhaseConfig::new("slow-phase", "slow");
        config.timeout_seconds = 1;
        config.max_retries = 0;
        let workflow = WorkflowDefinition::new("slow", vec![config]);

        let exec =
            WorkflowExecutor::bind(&workflow, Arc::new(registry), PhaseHandler::default());
        let ctx = exec
            .run(ExecutionContext::new(&workflow, "exec-3", json!({})))
            .await;

        let result = ctx.result("slow-phase").unwrap();
        assert_eq!(result.status, PhaseStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("Phase timed out after 1s"));
        assert_eq!(ctx.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancellation_stops_in_flight_phase() {
        let log = log();
        let slow = ScriptedPhase::ok("research", &log);
        let mut registry = AgentRegistry::new();
        registry.register_handle(AgentHandle::new("sleepy").with_execute(Entrypoint::from_async(
            |_, _| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(json!("never"))
            },
        )));
        let blocked: Arc<dyn Phase> = Arc::new(BoundPhase::new(
            PhaseConfig::new("draft", "sleepy"),
            Arc::new(registry),
            PhaseHandler::default(),
        ));

        let token = CancellationToken::new();
        let exec = WorkflowExecutor::new(vec![slow, blocked, ScriptedPhase::ok("review", &log)])
            .with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });
        let ctx = exec.run(context(&["research", "draft", "review"])).await;
        canceller.await.unwrap();

        assert_eq!(ctx.status, ExecutionStatus::Cancelled);
        assert_eq!(ctx.results.len(), 2);
        let draft = ctx.result("draft").unwrap();
        assert_eq!(draft.status, PhaseStatus::Failed);
        assert_eq!(draft.error.as_deref(), Some("execution cancelled"));
    }

    #[tokio::test]
    async fn test_events_are_published() {
        let log = log();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let exec = WorkflowExecutor::new(vec![ScriptedPhase::ok("only", &log)]).with_events(tx);
        exec.run(context(&["only"])).await;
        drop(exec);

        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], ExecutionEvent::PhaseStarted { phase, index: 0, .. } if phase == "only"));
        assert!(matches!(&events[1], ExecutionEvent::PhaseFinished { result, .. } if result.is_completed()));
        assert!(matches!(
            &events[2],
            ExecutionEvent::Finished { status: ExecutionStatus::Completed, .. }
        ));
    }
}
