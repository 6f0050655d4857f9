//! Workflow executor
//!
//! Walks a workflow graph depth-first from its entry nodes, invoking action
//! handlers with per-node retry and exponential backoff, appending log
//! lines to the execution store, and publishing events on the bus.
//!
//! Traversal invariants:
//! - every executed node logs exactly one `started` and one terminal line,
//!   with retries strictly between them
//! - a revisited node id means the graph has a cycle; the execution fails
//!   with a cycle error instead of recursing forever
//! - `finished_at` is stamped and `execution_finished` emitted on every
//!   path out of `run`

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{error, instrument, warn};

use cascade_core::condition::evaluate;
use cascade_core::template::render_params;
use cascade_core::{
    Execution, ExecutionEvent, ExecutionStatus, LogStatus, Node, ValidationError,
    WorkflowDefinition,
};
use cascade_storage::{ExecutionStore, StoreError};

use crate::actions::{new_context, snapshot, ActionRegistry, Context};
use crate::bus::EventBus;

/// Longest backoff between retries, in seconds.
const MAX_BACKOFF_SECS: u64 = 10;

/// Errors from executor operations.
///
/// Handler failures and graph defects surface as a `failed` execution, not
/// as an `Err`; only infrastructure faults propagate.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
enum RunFailure {
    #[error("cycle detected at node '{0}'")]
    Cycle(String),

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("node '{node_id}' failed: {message}")]
    Handler { node_id: String, message: String },

    #[error(transparent)]
    Store(StoreError),
}

/// Drives one workflow definition over one execution record.
pub struct WorkflowExecutor {
    store: Arc<dyn ExecutionStore>,
    registry: Arc<ActionRegistry>,
    bus: Arc<EventBus>,
}

impl WorkflowExecutor {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        registry: Arc<ActionRegistry>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            registry,
            bus,
        }
    }

    /// Run the graph to completion.
    ///
    /// Transitions the execution `pending → running`, traverses every entry
    /// node, and always stamps `finished_at` and emits
    /// `execution_finished` before returning.
    #[instrument(skip(self, workflow, execution, initial_context), fields(execution_id = %execution.id, workflow_id = %execution.workflow_id))]
    pub async fn run(
        &self,
        workflow: &WorkflowDefinition,
        mut execution: Execution,
        initial_context: Value,
    ) -> Result<Execution, ExecutorError> {
        let workflow_id = execution.workflow_id;

        execution.begin();
        self.store.update_execution(&execution).await?;
        self.bus
            .publish_execution(
                workflow_id,
                &ExecutionEvent::ExecutionStarted {
                    execution_id: execution.id,
                },
            )
            .await;

        let ctx = new_context(initial_context);
        ctx.lock()
            .await
            .insert("execution_id".to_string(), json!(execution.id));

        let outcome = self.traverse(workflow, &execution, &ctx).await;

        let status = match outcome {
            Ok(()) => ExecutionStatus::Succeeded,
            Err(RunFailure::Store(e)) => {
                execution.finish(ExecutionStatus::Failed);
                let _ = self.store.update_execution(&execution).await;
                self.bus
                    .publish_execution(
                        workflow_id,
                        &ExecutionEvent::ExecutionFinished {
                            execution_id: execution.id,
                            status: ExecutionStatus::Failed,
                        },
                    )
                    .await;
                return Err(ExecutorError::Store(e));
            }
            Err(failure) => {
                let message = failure.to_string();
                error!("execution failed: {}", message);
                let _ = self
                    .log_and_emit(&execution, "engine", LogStatus::Error, Some(&message))
                    .await;
                ExecutionStatus::Failed
            }
        };

        execution.finish(status);
        self.store.update_execution(&execution).await?;
        self.bus
            .publish_execution(
                workflow_id,
                &ExecutionEvent::ExecutionFinished {
                    execution_id: execution.id,
                    status,
                },
            )
            .await;

        Ok(execution)
    }

    async fn traverse(
        &self,
        workflow: &WorkflowDefinition,
        execution: &Execution,
        ctx: &Context,
    ) -> Result<(), RunFailure> {
        workflow.validate()?;
        let visited = Mutex::new(HashSet::new());
        for entry in workflow.entry_nodes() {
            self.visit(workflow, execution, entry, &visited, ctx).await?;
        }
        Ok(())
    }

    fn visit<'a>(
        &'a self,
        workflow: &'a WorkflowDefinition,
        execution: &'a Execution,
        node: &'a Node,
        visited: &'a Mutex<HashSet<String>>,
        ctx: &'a Context,
    ) -> BoxFuture<'a, Result<(), RunFailure>> {
        Box::pin(async move {
            if !visited.lock().insert(node.id.clone()) {
                return Err(RunFailure::Cycle(node.id.clone()));
            }

            self.log_and_emit(execution, &node.id, LogStatus::Started, None)
                .await?;
            self.bus
                .publish_execution(
                    execution.workflow_id,
                    &ExecutionEvent::NodeStarted {
                        node_id: node.id.clone(),
                        action: node.action.clone(),
                    },
                )
                .await;

            let rendered = {
                let mut guard = ctx.lock().await;
                guard.insert("current_step_id".to_string(), json!(node.id));
                let current = Value::Object(guard.clone());
                Value::Object(render_params(&node.params, &current))
            };

            match self.registry.get(&node.action) {
                Some(handler) => {
                    self.invoke_with_retries(execution, node, handler, rendered, ctx)
                        .await?;
                    self.log_and_emit(execution, &node.id, LogStatus::Completed, None)
                        .await?;
                }
                None => {
                    let message =
                        format!("no handler registered for action '{}'; skipped", node.action);
                    warn!(node_id = %node.id, "{message}");
                    self.log_and_emit(execution, &node.id, LogStatus::Completed, Some(&message))
                        .await?;
                }
            }

            self.bus
                .publish_execution(
                    execution.workflow_id,
                    &ExecutionEvent::NodeCompleted {
                        node_id: node.id.clone(),
                    },
                )
                .await;

            // Conditions may use bare context paths ("check_result") or the
            // namespaced forms ("data.check_result", "params.x")
            let data = snapshot(ctx).await;
            let mut edge_scope = match &data {
                Value::Object(map) => map.clone(),
                _ => serde_json::Map::new(),
            };
            edge_scope.insert("data".to_string(), data);
            edge_scope.insert("params".to_string(), Value::Object(node.params.clone()));
            let edge_ctx = Value::Object(edge_scope);
            for edge in workflow.edges_from(&node.id) {
                let satisfied = edge
                    .condition
                    .as_ref()
                    .map(|cond| evaluate(cond, &edge_ctx))
                    .unwrap_or(true);
                if !satisfied {
                    continue;
                }
                if let Some(target) = workflow.node(&edge.target) {
                    self.visit(workflow, execution, target, visited, ctx).await?;
                }
            }

            Ok(())
        })
    }

    /// Attempt the handler up to `retries + 1` times, sleeping
    /// `min(2^attempt, 10)` seconds between attempts.
    async fn invoke_with_retries(
        &self,
        execution: &Execution,
        node: &Node,
        handler: crate::actions::ActionHandler,
        params: Value,
        ctx: &Context,
    ) -> Result<(), RunFailure> {
        let attempts = node.retries + 1;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match handler(params.clone(), ctx.clone()).await {
                Ok(_) => return Ok(()),
                Err(err) if attempt < attempts => {
                    let message = format!("Retry {attempt} failed: {err}");
                    warn!(node_id = %node.id, "{message}");
                    self.log_and_emit(execution, &node.id, LogStatus::Retry, Some(&message))
                        .await?;
                    let backoff = 2u64.saturating_pow(attempt).min(MAX_BACKOFF_SECS);
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                }
                Err(err) => {
                    let message = err.to_string();
                    self.log_and_emit(execution, &node.id, LogStatus::Error, Some(&message))
                        .await?;
                    return Err(RunFailure::Handler {
                        node_id: node.id.clone(),
                        message,
                    });
                }
            }
        }
    }

    async fn log_and_emit(
        &self,
        execution: &Execution,
        node_id: &str,
        status: LogStatus,
        message: Option<&str>,
    ) -> Result<(), RunFailure> {
        self.store
            .append_log(execution.id, node_id, status, message)
            .await
            .map_err(RunFailure::Store)?;
        self.bus
            .publish_execution(
                execution.workflow_id,
                &ExecutionEvent::Log {
                    node_id: node_id.to_string(),
                    status,
                    message: message.map(str::to_string),
                },
            )
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionError;
    use crate::realtime::NoopBridge;
    use cascade_storage::MemoryExecutionStore;
    use serde_json::json;
    use uuid::Uuid;

    struct Harness {
        store: Arc<MemoryExecutionStore>,
        bus: Arc<EventBus>,
        executor: WorkflowExecutor,
    }

    fn harness(registry: ActionRegistry) -> Harness {
        let store = Arc::new(MemoryExecutionStore::new());
        let bus = Arc::new(EventBus::new(Arc::new(NoopBridge)));
        let executor = WorkflowExecutor::new(store.clone(), Arc::new(registry), bus.clone());
        Harness {
            store,
            bus,
            executor,
        }
    }

    fn noop_registry() -> ActionRegistry {
        let mut registry = ActionRegistry::new();
        registry.register("notify", |_p, _c| async { Ok(Value::Null) });
        registry
    }

    async fn fresh_execution(store: &MemoryExecutionStore, data: Value) -> Execution {
        let wf = store
            .create_workflow(Uuid::now_v7(), "wf", &WorkflowDefinition::default())
            .await
            .unwrap();
        store.create_execution(wf.id, data).await.unwrap()
    }

    fn linear() -> WorkflowDefinition {
        serde_json::from_value(json!({
            "nodes": [
                {"id": "start", "type": "start", "action": "notify"},
                {"id": "n1", "action": "notify"}
            ],
            "edges": [{"source": "start", "target": "n1"}]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_linear_success() {
        let h = harness(noop_registry());
        let execution = fresh_execution(&h.store, json!({})).await;
        let execution_id = execution.id;

        let finished = h.executor.run(&linear(), execution, json!({})).await.unwrap();
        assert_eq!(finished.status, ExecutionStatus::Succeeded);
        assert!(finished.finished_at.unwrap() >= finished.started_at.unwrap());

        let logs = h.store.list_logs(execution_id).await.unwrap();
        let shape: Vec<(&str, LogStatus)> = logs
            .iter()
            .map(|l| (l.node_id.as_str(), l.status))
            .collect();
        assert_eq!(
            shape,
            vec![
                ("start", LogStatus::Started),
                ("start", LogStatus::Completed),
                ("n1", LogStatus::Started),
                ("n1", LogStatus::Completed),
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_action_is_noop_completed() {
        let h = harness(ActionRegistry::new());
        let execution = fresh_execution(&h.store, json!({})).await;
        let execution_id = execution.id;

        let wf: WorkflowDefinition = serde_json::from_value(json!({
            "nodes": [{"id": "solo", "action": "not_installed"}]
        }))
        .unwrap();

        let finished = h.executor.run(&wf, execution, json!({})).await.unwrap();
        assert_eq!(finished.status, ExecutionStatus::Succeeded);

        let logs = h.store.list_logs(execution_id).await.unwrap();
        assert_eq!(logs[1].status, LogStatus::Completed);
        assert!(logs[1]
            .message
            .as_deref()
            .unwrap()
            .contains("not_installed"));
    }

    #[tokio::test]
    async fn test_cycle_fails_cleanly() {
        let h = harness(noop_registry());
        let execution = fresh_execution(&h.store, json!({})).await;
        let execution_id = execution.id;

        let wf: WorkflowDefinition = serde_json::from_value(json!({
            "nodes": [
                {"id": "a", "type": "start", "action": "notify"},
                {"id": "b", "action": "notify"}
            ],
            "edges": [
                {"source": "a", "target": "b"},
                {"source": "b", "target": "a"}
            ]
        }))
        .unwrap();

        let finished = h.executor.run(&wf, execution, json!({})).await.unwrap();
        assert_eq!(finished.status, ExecutionStatus::Failed);

        let logs = h.store.list_logs(execution_id).await.unwrap();
        // No node logged `started` more than once
        for node in ["a", "b"] {
            let starts = logs
                .iter()
                .filter(|l| l.node_id == node && l.status == LogStatus::Started)
                .count();
            assert!(starts <= 1, "node {node} started {starts} times");
        }
        let engine_log = logs.last().unwrap();
        assert_eq!(engine_log.node_id, "engine");
        assert!(engine_log.message.as_deref().unwrap().contains("cycle"));
    }

    #[tokio::test]
    async fn test_conditional_edges_follow_satisfied_only() {
        let mut registry = noop_registry();
        registry.register("flag", |_p, ctx: Context| async move {
            ctx.lock().await.insert("check_result".into(), json!(false));
            Ok(Value::Null)
        });
        let h = harness(registry);
        let execution = fresh_execution(&h.store, json!({})).await;
        let execution_id = execution.id;

        let wf: WorkflowDefinition = serde_json::from_value(json!({
            "nodes": [
                {"id": "check", "type": "start", "action": "flag"},
                {"id": "escalate", "action": "notify"},
                {"id": "close", "action": "notify"}
            ],
            "edges": [
                {"source": "check", "target": "escalate",
                 "condition": {"op": "eq", "path": "data.check_result", "value": false}},
                {"source": "check", "target": "close",
                 "condition": {"op": "eq", "path": "data.check_result", "value": true}}
            ]
        }))
        .unwrap();

        h.executor.run(&wf, execution, json!({})).await.unwrap();

        let logs = h.store.list_logs(execution_id).await.unwrap();
        let visited: Vec<&str> = logs
            .iter()
            .filter(|l| l.status == LogStatus::Started)
            .map(|l| l.node_id.as_str())
            .collect();
        assert_eq!(visited, vec!["check", "escalate"]);
    }

    #[tokio::test]
    async fn test_invalid_definition_fails_without_node_logs() {
        let h = harness(noop_registry());
        let execution = fresh_execution(&h.store, json!({})).await;
        let execution_id = execution.id;

        let wf: WorkflowDefinition = serde_json::from_value(json!({
            "nodes": [{"id": "a"}],
            "edges": [{"source": "a", "target": "ghost"}]
        }))
        .unwrap();

        let finished = h.executor.run(&wf, execution, json!({})).await.unwrap();
        assert_eq!(finished.status, ExecutionStatus::Failed);

        let logs = h.store.list_logs(execution_id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].node_id, "engine");
    }

    #[tokio::test]
    async fn test_params_are_templated_from_context() {
        let mut registry = ActionRegistry::new();
        let seen: Arc<parking_lot::Mutex<Option<Value>>> = Arc::new(parking_lot::Mutex::new(None));
        let seen_in = seen.clone();
        registry.register("capture", move |params, _ctx| {
            let seen = seen_in.clone();
            async move {
                *seen.lock() = Some(params);
                Ok(Value::Null)
            }
        });
        let h = harness(registry);
        let execution = fresh_execution(&h.store, json!({})).await;

        let wf: WorkflowDefinition = serde_json::from_value(json!({
            "nodes": [{"id": "a", "action": "capture",
                       "params": {"to": "{{user_email}}", "missing": "{{nope}}"}}]
        }))
        .unwrap();

        h.executor
            .run(&wf, execution, json!({"user_email": "a@b.c"}))
            .await
            .unwrap();

        let params = seen.lock().clone().unwrap();
        assert_eq!(params["to"], "a@b.c");
        assert_eq!(params["missing"], "");
    }

    #[tokio::test]
    async fn test_subscriber_sees_full_event_stream() {
        let h = harness(noop_registry());
        let execution = fresh_execution(&h.store, json!({})).await;
        let workflow_id = execution.workflow_id;
        let mut sub = h.bus.subscribe(workflow_id);

        let wf: WorkflowDefinition = serde_json::from_value(json!({
            "nodes": [{"id": "only", "type": "start", "action": "notify"}]
        }))
        .unwrap();
        h.executor.run(&wf, execution, json!({})).await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = sub.receiver.try_recv() {
            kinds.push(match event {
                ExecutionEvent::ExecutionStarted { .. } => "execution_started",
                ExecutionEvent::NodeStarted { .. } => "node_started",
                ExecutionEvent::NodeCompleted { .. } => "node_completed",
                ExecutionEvent::Log { .. } => "log",
                ExecutionEvent::ExecutionFinished { .. } => "execution_finished",
            });
        }
        assert_eq!(
            kinds,
            vec![
                "execution_started",
                "log",
                "node_started",
                "log",
                "node_completed",
                "execution_finished",
            ]
        );
    }

    #[tokio::test]
    async fn test_handler_error_type_not_retried_forever() {
        let mut registry = ActionRegistry::new();
        registry.register("always_fails", |_p, _c| async {
            Err(ActionError::Failed("nope".into()))
        });
        let h = harness(registry);
        let execution = fresh_execution(&h.store, json!({})).await;
        let execution_id = execution.id;

        let wf: WorkflowDefinition = serde_json::from_value(json!({
            "nodes": [{"id": "a", "action": "always_fails", "retries": 0}]
        }))
        .unwrap();

        let finished = h.executor.run(&wf, execution, json!({})).await.unwrap();
        assert_eq!(finished.status, ExecutionStatus::Failed);

        let logs = h.store.list_logs(execution_id).await.unwrap();
        let a_logs: Vec<LogStatus> = logs
            .iter()
            .filter(|l| l.node_id == "a")
            .map(|l| l.status)
            .collect();
        assert_eq!(a_logs, vec![LogStatus::Started, LogStatus::Error]);
    }
}
