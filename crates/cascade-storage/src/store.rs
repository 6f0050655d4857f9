//! Execution store trait and shared row types

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use cascade_core::{Execution, ExecutionLog, LogStatus, WorkflowDefinition};

/// Errors from store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Workflow not found
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    /// Execution not found
    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored definition no longer deserializes
    #[error("corrupt stored definition: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// A workflow as persisted, definition included.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredWorkflow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub definition: WorkflowDefinition,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persistence facade for workflows, executions, and execution logs.
///
/// Logs are append-only; `list_logs` returns them in insertion order
/// (ascending timestamp, ties broken by id).
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create_workflow(
        &self,
        user_id: Uuid,
        name: &str,
        definition: &WorkflowDefinition,
    ) -> Result<StoredWorkflow, StoreError>;

    async fn get_workflow(&self, id: Uuid) -> Result<Option<StoredWorkflow>, StoreError>;

    async fn create_execution(
        &self,
        workflow_id: Uuid,
        trigger_data: Value,
    ) -> Result<Execution, StoreError>;

    async fn get_execution(&self, id: Uuid) -> Result<Option<Execution>, StoreError>;

    /// Persist the current status and timestamps of an execution.
    async fn update_execution(&self, execution: &Execution) -> Result<(), StoreError>;

    async fn append_log(
        &self,
        execution_id: Uuid,
        node_id: &str,
        status: LogStatus,
        message: Option<&str>,
    ) -> Result<ExecutionLog, StoreError>;

    /// Executions of a workflow, newest first.
    async fn list_executions(&self, workflow_id: Uuid) -> Result<Vec<Execution>, StoreError>;

    /// Log lines of an execution in insertion order.
    async fn list_logs(&self, execution_id: Uuid) -> Result<Vec<ExecutionLog>, StoreError>;
}
