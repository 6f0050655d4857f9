//! In-memory implementation of the execution store
//!
//! Primarily for tests; provides the same semantics as the PostgreSQL
//! implementation, including log insertion order and id tie-breaking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use cascade_core::{Execution, ExecutionLog, LogStatus, WorkflowDefinition};

use crate::store::{ExecutionStore, StoreError, StoredWorkflow};

#[derive(Default)]
struct Inner {
    workflows: HashMap<Uuid, StoredWorkflow>,
    executions: HashMap<Uuid, Execution>,
    logs: Vec<ExecutionLog>,
}

/// In-memory execution store.
pub struct MemoryExecutionStore {
    inner: RwLock<Inner>,
    log_seq: AtomicI64,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            log_seq: AtomicI64::new(1),
        }
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.workflows.clear();
        inner.executions.clear();
        inner.logs.clear();
    }
}

impl Default for MemoryExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn create_workflow(
        &self,
        user_id: Uuid,
        name: &str,
        definition: &WorkflowDefinition,
    ) -> Result<StoredWorkflow, StoreError> {
        let now = Utc::now();
        let workflow = StoredWorkflow {
            id: Uuid::now_v7(),
            user_id,
            name: name.to_string(),
            definition: definition.clone(),
            created_at: now,
            updated_at: now,
        };
        self.inner
            .write()
            .workflows
            .insert(workflow.id, workflow.clone());
        Ok(workflow)
    }

    async fn get_workflow(&self, id: Uuid) -> Result<Option<StoredWorkflow>, StoreError> {
        Ok(self.inner.read().workflows.get(&id).cloned())
    }

    async fn create_execution(
        &self,
        workflow_id: Uuid,
        trigger_data: Value,
    ) -> Result<Execution, StoreError> {
        let mut inner = self.inner.write();
        if !inner.workflows.contains_key(&workflow_id) {
            return Err(StoreError::WorkflowNotFound(workflow_id));
        }
        let execution = Execution::new(workflow_id, trigger_data);
        inner.executions.insert(execution.id, execution.clone());
        Ok(execution)
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<Execution>, StoreError> {
        Ok(self.inner.read().executions.get(&id).cloned())
    }

    async fn update_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        match inner.executions.get_mut(&execution.id) {
            Some(stored) => {
                *stored = execution.clone();
                Ok(())
            }
            None => Err(StoreError::ExecutionNotFound(execution.id)),
        }
    }

    async fn append_log(
        &self,
        execution_id: Uuid,
        node_id: &str,
        status: LogStatus,
        message: Option<&str>,
    ) -> Result<ExecutionLog, StoreError> {
        let mut inner = self.inner.write();
        if !inner.executions.contains_key(&execution_id) {
            return Err(StoreError::ExecutionNotFound(execution_id));
        }
        let log = ExecutionLog {
            id: self.log_seq.fetch_add(1, Ordering::Relaxed),
            execution_id,
            node_id: node_id.to_string(),
            status,
            message: message.map(str::to_string),
            timestamp: Utc::now(),
        };
        inner.logs.push(log.clone());
        Ok(log)
    }

    async fn list_executions(&self, workflow_id: Uuid) -> Result<Vec<Execution>, StoreError> {
        let inner = self.inner.read();
        let mut executions: Vec<Execution> = inner
            .executions
            .values()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect();
        // v7 ids are time-ordered; newest first
        executions.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(executions)
    }

    async fn list_logs(&self, execution_id: Uuid) -> Result<Vec<ExecutionLog>, StoreError> {
        let inner = self.inner.read();
        let mut logs: Vec<ExecutionLog> = inner
            .logs
            .iter()
            .filter(|l| l.execution_id == execution_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(logs)
    }
}
