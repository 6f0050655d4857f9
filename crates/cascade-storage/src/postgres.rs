//! PostgreSQL implementation of the execution store
//!
//! Schema lives in `migrations/`; cascading deletes flow from workflows to
//! executions to logs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use cascade_core::{Execution, ExecutionLog, ExecutionStatus, LogStatus, WorkflowDefinition};

use crate::store::{ExecutionStore, StoreError, StoredWorkflow};

#[derive(Debug, FromRow)]
struct WorkflowRow {
    id: Uuid,
    user_id: Uuid,
    name: String,
    definition: sqlx::types::JsonValue,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WorkflowRow {
    fn into_stored(self) -> Result<StoredWorkflow, StoreError> {
        Ok(StoredWorkflow {
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            definition: serde_json::from_value(self.definition)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ExecutionRow {
    id: Uuid,
    workflow_id: Uuid,
    status: String,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    trigger_data: Option<sqlx::types::JsonValue>,
}

impl From<ExecutionRow> for Execution {
    fn from(row: ExecutionRow) -> Self {
        Execution {
            id: row.id,
            workflow_id: row.workflow_id,
            status: row.status.parse().unwrap_or(ExecutionStatus::Pending),
            started_at: row.started_at,
            finished_at: row.finished_at,
            trigger_data: row.trigger_data.unwrap_or(Value::Null),
        }
    }
}

#[derive(Debug, FromRow)]
struct ExecutionLogRow {
    id: i64,
    execution_id: Uuid,
    node_id: String,
    status: String,
    message: Option<String>,
    timestamp: DateTime<Utc>,
}

impl From<ExecutionLogRow> for ExecutionLog {
    fn from(row: ExecutionLogRow) -> Self {
        ExecutionLog {
            id: row.id,
            execution_id: row.execution_id,
            node_id: row.node_id,
            status: row.status.parse().unwrap_or(LogStatus::Error),
            message: row.message,
            timestamp: row.timestamp,
        }
    }
}

/// PostgreSQL-backed execution store.
#[derive(Clone)]
pub struct PgExecutionStore {
    pool: PgPool,
}

impl PgExecutionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and run pending migrations.
    pub async fn from_url(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Database(e.into()))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ExecutionStore for PgExecutionStore {
    async fn create_workflow(
        &self,
        user_id: Uuid,
        name: &str,
        definition: &WorkflowDefinition,
    ) -> Result<StoredWorkflow, StoreError> {
        let definition_json = serde_json::to_value(definition)?;
        let row = sqlx::query_as::<_, WorkflowRow>(
            r#"
            INSERT INTO workflows (id, user_id, name, definition)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, name, definition, created_at, updated_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(user_id)
        .bind(name)
        .bind(&definition_json)
        .fetch_one(&self.pool)
        .await?;

        row.into_stored()
    }

    async fn get_workflow(&self, id: Uuid) -> Result<Option<StoredWorkflow>, StoreError> {
        let row = sqlx::query_as::<_, WorkflowRow>(
            r#"
            SELECT id, user_id, name, definition, created_at, updated_at
            FROM workflows
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(WorkflowRow::into_stored).transpose()
    }

    async fn create_execution(
        &self,
        workflow_id: Uuid,
        trigger_data: Value,
    ) -> Result<Execution, StoreError> {
        let execution = Execution::new(workflow_id, trigger_data);
        sqlx::query(
            r#"
            INSERT INTO executions (id, workflow_id, status, trigger_data)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(execution.id)
        .bind(execution.workflow_id)
        .bind(execution.status.as_str())
        .bind(&execution.trigger_data)
        .execute(&self.pool)
        .await?;

        Ok(execution)
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<Execution>, StoreError> {
        let row = sqlx::query_as::<_, ExecutionRow>(
            r#"
            SELECT id, workflow_id, status, started_at, finished_at, trigger_data
            FROM executions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Execution::from))
    }

    async fn update_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = $2, started_at = $3, finished_at = $4
            WHERE id = $1
            "#,
        )
        .bind(execution.id)
        .bind(execution.status.as_str())
        .bind(execution.started_at)
        .bind(execution.finished_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ExecutionNotFound(execution.id));
        }
        Ok(())
    }

    async fn append_log(
        &self,
        execution_id: Uuid,
        node_id: &str,
        status: LogStatus,
        message: Option<&str>,
    ) -> Result<ExecutionLog, StoreError> {
        let row = sqlx::query_as::<_, ExecutionLogRow>(
            r#"
            INSERT INTO execution_logs (execution_id, node_id, status, message, timestamp)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, execution_id, node_id, status, message, timestamp
            "#,
        )
        .bind(execution_id)
        .bind(node_id)
        .bind(status.as_str())
        .bind(message)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn list_executions(&self, workflow_id: Uuid) -> Result<Vec<Execution>, StoreError> {
        let rows = sqlx::query_as::<_, ExecutionRow>(
            r#"
            SELECT id, workflow_id, status, started_at, finished_at, trigger_data
            FROM executions
            WHERE workflow_id = $1
            ORDER BY id DESC
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Execution::from).collect())
    }

    async fn list_logs(&self, execution_id: Uuid) -> Result<Vec<ExecutionLog>, StoreError> {
        let rows = sqlx::query_as::<_, ExecutionLogRow>(
            r#"
            SELECT id, execution_id, node_id, status, message, timestamp
            FROM execution_logs
            WHERE execution_id = $1
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ExecutionLog::from).collect())
    }
}

// Note: integration tests for this store require a running PostgreSQL;
// the in-memory store covers the trait semantics in unit tests.
