//! The persistence seam used by the coordinator and the outer surfaces.

use async_trait::async_trait;

use crate::db::Database;
use crate::error::ServerError;
use crate::models::execution::ExecutionRecord;
use crate::store::{ExecutionStore, WorkflowStore};
use crate::workflow::schema::WorkflowDefinition;

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn save_workflow(&self, workflow: &WorkflowDefinition) -> Result<(), ServerError>;

    async fn get_workflow(&self, id: &str) -> Result<Option<WorkflowDefinition>, ServerError>;

    async fn list_workflows(
        &self,
        owner_id: Option<&str>,
    ) -> Result<Vec<WorkflowDefinition>, ServerError>;

    async fn delete_workflow(&self, id: &str) -> Result<bool, ServerError>;

    /// Upsert the record keyed by execution id. `Ok(false)` means the
    /// backend declined the write without raising.
    async fn persist_execution(&self, record: &ExecutionRecord) -> Result<bool, ServerError>;

    async fn get_execution(&self, id: &str) -> Result<Option<ExecutionRecord>, ServerError>;

    async fn list_executions(&self, workflow_id: &str) -> Result<Vec<ExecutionRecord>, ServerError>;
}

/// SQLite-backed repository.
#[derive(Clone)]
pub struct SqliteRepository {
    workflows: WorkflowStore,
    executions: ExecutionStore,
}

impl SqliteRepository {
    pub fn new(db: Database) -> Self {
        Self {
            workflows: WorkflowStore::new(db.clone()),
            executions: ExecutionStore::new(db),
        }
    }
}

#[async_trait]
impl WorkflowRepository for SqliteRepository {
    async fn save_workflow(&self, workflow: &WorkflowDefinition) -> Result<(), ServerError> {
        self.workflows.save(workflow).await
    }

    async fn get_workflow(&self, id: &str) -> Result<Option<WorkflowDefinition>, ServerError> {
        self.workflows.get(id).await
    }

    async fn list_workflows(
        &self,
        owner_id: Option<&str>,
    ) -> Result<Vec<WorkflowDefinition>, ServerError> {
        self.workflows.list(owner_id).await
    }

    async fn delete_workflow(&self, id: &str) -> Result<bool, ServerError> {
        self.workflows.delete(id).await
    }

    async fn persist_execution(&self, record: &ExecutionRecord) -> Result<bool, ServerError> {
        self.executions.upsert(record).await?;
        Ok(true)
    }

    async fn get_execution(&self, id: &str) -> Result<Option<ExecutionRecord>, ServerError> {
        self.executions.get(id).await
    }

    async fn list_executions(&self, workflow_id: &str) -> Result<Vec<ExecutionRecord>, ServerError> {
        self.executions.list_by_workflow(workflow_id).await
    }
}
