//! Background execution coordinator.
//!
//! Launches workflow runs either inline or as detached tokio tasks, keeps a
//! live view of in-flight runs, and is the single writer of
//! `ExecutionRecord`s. Persistence is best effort: failures are logged and
//! never surface to the caller or abort a run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::{ServerError, WorkflowError};
use crate::models::execution::ExecutionRecord;
use crate::store::WorkflowRepository;
use crate::workflow::agent::AgentRegistry;
use crate::workflow::context::{
    progress_percent, ExecutionContext, ExecutionHandle, ExecutionStatus, PhaseStatus,
};
use crate::workflow::executor::{ExecutionEvent, WorkflowExecutor};
use crate::workflow::phase::PhaseHandler;
use crate::workflow::schema::WorkflowDefinition;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Concurrent blocking agent calls across all runs
    pub max_blocking_calls: usize,
    /// Finished runs kept in the live map before the oldest are evicted
    pub max_retained_runs: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_blocking_calls: 8,
            max_retained_runs: 200,
        }
    }
}

/// Whether `execute` waits for the run to finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Sync,
    Async,
}

struct LiveRun {
    view: ExecutionHandle,
    cancel: CancellationToken,
    done: watch::Receiver<Option<ExecutionHandle>>,
    finished_at: Option<Instant>,
}

struct CoordinatorInner {
    registry: Arc<AgentRegistry>,
    repository: Arc<dyn WorkflowRepository>,
    handler: PhaseHandler,
    runs: RwLock<HashMap<String, LiveRun>>,
    config: CoordinatorConfig,
}

#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

impl Coordinator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        repository: Arc<dyn WorkflowRepository>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                registry,
                repository,
                handler: PhaseHandler::new(config.max_blocking_calls),
                runs: RwLock::new(HashMap::new()),
                config,
            }),
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.inner.registry
    }

    pub fn repository(&self) -> &Arc<dyn WorkflowRepository> {
        &self.inner.repository
    }

    /// Launch a run of `workflow` with `input`.
    ///
    /// Only validation errors are returned; everything that goes wrong
    /// during the run is reported through the handle and the record.
    pub async fn execute(
        &self,
        workflow: WorkflowDefinition,
        input: Value,
        mode: ExecutionMode,
    ) -> Result<ExecutionHandle, WorkflowError> {
        workflow.validate()?;

        let execution_id = uuid::Uuid::new_v4().to_string();
        let ctx = ExecutionContext::new(&workflow, &execution_id, input);
        let pending = ExecutionHandle::pending(&ctx, workflow.phase_names());

        tracing::info!(
            execution_id = %execution_id,
            workflow_id = %workflow.id,
            mode = ?mode,
            "Launching workflow"
        );
        self.persist(&ExecutionRecord::pending(&ctx, &workflow)).await;

        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(None);
        self.inner.runs.write().await.insert(
            execution_id.clone(),
            LiveRun {
                view: pending.clone(),
                cancel: cancel.clone(),
                done: done_rx,
                finished_at: None,
            },
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(self.clone().track(events_rx));
        let executor = WorkflowExecutor::bind(
            &workflow,
            self.inner.registry.clone(),
            self.inner.handler.clone(),
        )
        .with_events(events_tx)
        .with_cancellation(cancel);

        match mode {
            ExecutionMode::Sync => {
                let ctx = executor.run(ctx).await;
                drop(executor);
                Ok(self.finish(&workflow, ctx, None, done_tx).await)
            }
            ExecutionMode::Async => {
                let this = self.clone();
                tokio::spawn(async move {
                    this.drive(workflow, executor, ctx, done_tx).await;
                });
                Ok(pending)
            }
        }
    }

    /// Run detached; a panicking engine still produces a failed record.
    async fn drive(
        &self,
        workflow: WorkflowDefinition,
        executor: WorkflowExecutor,
        ctx: ExecutionContext,
        done: watch::Sender<Option<ExecutionHandle>>,
    ) {
        let fallback = ctx.clone();
        let joined = tokio::spawn(async move { executor.run(ctx).await }).await;
        match joined {
            Ok(ctx) => {
                self.finish(&workflow, ctx, None, done).await;
            }
            Err(e) => {
                tracing::error!(
                    execution_id = %fallback.request_id,
                    error = %e,
                    "Workflow task panicked"
                );
                let mut ctx = fallback;
                ctx.finish(ExecutionStatus::Failed);
                let message = format!("workflow task panicked: {}", e);
                self.finish(&workflow, ctx, Some(message), done).await;
            }
        }
    }

    /// Mirror engine progress into the live view.
    async fn track(self, mut events: mpsc::UnboundedReceiver<ExecutionEvent>) {
        while let Some(event) = events.recv().await {
            let (execution_id, result) = match event {
                ExecutionEvent::PhaseStarted { execution_id, .. } => (execution_id, None),
                ExecutionEvent::PhaseFinished {
                    execution_id,
                    result,
                } => (execution_id, Some(result)),
                // The terminal view is written by `finish`.
                ExecutionEvent::Finished { .. } => continue,
            };

            let mut runs = self.inner.runs.write().await;
            let Some(run) = runs.get_mut(&execution_id) else {
                continue;
            };
            let view = &mut run.view;
            if view.status.is_terminal() {
                continue;
            }
            view.status = ExecutionStatus::Running;
            if let Some(result) = result {
                let results = view.results.get_or_insert_with(Vec::new);
                results.push(result);
                let completed = results
                    .iter()
                    .filter(|r| r.status == PhaseStatus::Completed)
                    .count();
                view.progress_percent = progress_percent(completed, view.phases.len());
            }
        }
    }

    async fn finish(
        &self,
        workflow: &WorkflowDefinition,
        ctx: ExecutionContext,
        error: Option<String>,
        done: watch::Sender<Option<ExecutionHandle>>,
    ) -> ExecutionHandle {
        let mut record = ExecutionRecord::from_context(&ctx, workflow);
        if error.is_some() {
            record.error_message = error;
        }
        self.persist(&record).await;

        let handle = ExecutionHandle::from_context(&ctx, workflow.phase_names());
        {
            let mut runs = self.inner.runs.write().await;
            if let Some(run) = runs.get_mut(&ctx.request_id) {
                run.view = handle.clone();
                run.finished_at = Some(Instant::now());
            }
            evict_finished(&mut runs, self.inner.config.max_retained_runs);
        }
        let _ = done.send(Some(handle.clone()));
        handle
    }

    async fn persist(&self, record: &ExecutionRecord) {
        match self.inner.repository.persist_execution(record).await {
            Ok(true) => {
                tracing::debug!(execution_id = %record.id, status = %record.status, "Execution persisted");
            }
            Ok(false) => {
                tracing::warn!(
                    execution_id = %record.id,
                    status = %record.status,
                    "Repository declined to persist execution"
                );
            }
            Err(e) => {
                tracing::error!(
                    execution_id = %record.id,
                    status = %record.status,
                    error = %e,
                    "Failed to persist execution"
                );
            }
        }
    }

    /// Live view if the run is still tracked, else the persisted record.
    pub async fn status(&self, execution_id: &str) -> Result<Option<ExecutionHandle>, ServerError> {
        if let Some(run) = self.inner.runs.read().await.get(execution_id) {
            return Ok(Some(run.view.clone()));
        }
        Ok(self
            .inner
            .repository
            .get_execution(execution_id)
            .await?
            .map(|record| record.to_handle()))
    }

    /// Request cancellation. False if the run is unknown or already finished.
    pub async fn cancel(&self, execution_id: &str) -> bool {
        let runs = self.inner.runs.read().await;
        match runs.get(execution_id) {
            Some(run) if !run.view.status.is_terminal() => {
                tracing::info!(execution_id = %execution_id, "Cancelling execution");
                run.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Wait for a run to reach its terminal state.
    pub async fn wait(&self, execution_id: &str) -> Result<Option<ExecutionHandle>, ServerError> {
        let done = self
            .inner
            .runs
            .read()
            .await
            .get(execution_id)
            .map(|run| run.done.clone());
        if let Some(mut done) = done {
            if let Ok(handle) = done.wait_for(|h| h.is_some()).await {
                return Ok((*handle).clone());
            }
        }
        self.status(execution_id).await
    }
}

/// Drop the oldest finished runs beyond `keep`. Running entries stay.
fn evict_finished(runs: &mut HashMap<String, LiveRun>, keep: usize) {
    let mut finished: Vec<(Instant, String)> = runs
        .iter()
        .filter_map(|(id, run)| run.finished_at.map(|at| (at, id.clone())))
        .collect();
    if finished.len() <= keep {
        return;
    }
    finished.sort();
    let excess = finished.len() - keep;
    for (_, id) in finished.into_iter().take(excess) {
        runs.remove(&id);
    }
}
