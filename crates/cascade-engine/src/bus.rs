//! Event bus: local fan-out plus the external bridge
//!
//! One bus instance serves the whole process. Execution events fan out to
//! per-workflow local subscribers (websocket connections) and to the
//! per-workflow external channel; job updates go to the shared
//! `refresh-jobs` channel. Local delivery is best-effort: a subscriber
//! whose channel is closed is removed on the next publish, and no
//! subscriber can block another.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use cascade_core::events::{
    execution_channel, user_job_list_channel, JOB_LIST_EVENT, JOB_STATUS_EVENT,
    REFRESH_JOBS_CHANNEL,
};
use cascade_core::{ExecutionEvent, Job, JobStatusUpdate};

use crate::realtime::RealtimeBridge;

struct Subscriber {
    id: Uuid,
    tx: mpsc::UnboundedSender<ExecutionEvent>,
}

/// Handle returned by [`EventBus::subscribe`]. Dropping the receiver is
/// enough to be forgotten; `unsubscribe` removes the entry eagerly.
pub struct Subscription {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub receiver: mpsc::UnboundedReceiver<ExecutionEvent>,
}

/// Fan-out hub for execution and job events.
pub struct EventBus {
    subscribers: Mutex<HashMap<Uuid, Vec<Subscriber>>>,
    bridge: Arc<dyn RealtimeBridge>,
}

impl EventBus {
    pub fn new(bridge: Arc<dyn RealtimeBridge>) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            bridge,
        }
    }

    pub fn bridge(&self) -> &Arc<dyn RealtimeBridge> {
        &self.bridge
    }

    /// Register a local subscriber for one workflow's execution events.
    pub fn subscribe(&self, workflow_id: Uuid) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::now_v7();
        self.subscribers
            .lock()
            .entry(workflow_id)
            .or_default()
            .push(Subscriber { id, tx });
        Subscription {
            id,
            workflow_id,
            receiver: rx,
        }
    }

    /// Remove a local subscriber.
    pub fn unsubscribe(&self, workflow_id: Uuid, subscription_id: Uuid) {
        let mut subscribers = self.subscribers.lock();
        if let Some(list) = subscribers.get_mut(&workflow_id) {
            list.retain(|s| s.id != subscription_id);
            if list.is_empty() {
                subscribers.remove(&workflow_id);
            }
        }
    }

    /// Number of live local subscribers for a workflow.
    pub fn subscriber_count(&self, workflow_id: Uuid) -> usize {
        self.subscribers
            .lock()
            .get(&workflow_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Deliver an execution event to local subscribers and the external
    /// per-workflow channel.
    pub async fn publish_execution(&self, workflow_id: Uuid, event: &ExecutionEvent) {
        {
            let mut subscribers = self.subscribers.lock();
            if let Some(list) = subscribers.get_mut(&workflow_id) {
                list.retain(|s| {
                    let delivered = s.tx.send(event.clone()).is_ok();
                    if !delivered {
                        debug!(%workflow_id, subscriber = %s.id, "dropping dead subscriber");
                    }
                    delivered
                });
                if list.is_empty() {
                    subscribers.remove(&workflow_id);
                }
            }
        }

        let data = serde_json::to_value(event).unwrap_or(Value::Null);
        let name = data
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("execution-event")
            .to_string();
        self.bridge
            .publish(&execution_channel(workflow_id), &name, &data)
            .await;
    }

    /// Publish a job status transition on the shared jobs channel.
    pub async fn publish_job_update(&self, update: &JobStatusUpdate) {
        let data = serde_json::to_value(update).unwrap_or(Value::Null);
        self.bridge
            .publish(REFRESH_JOBS_CHANNEL, JOB_STATUS_EVENT, &data)
            .await;
    }

    /// Publish a user's full job list on their private channel.
    pub async fn publish_job_list(&self, user_id: Uuid, jobs: &[Job]) {
        let data = json!({
            "jobs": jobs,
            "timestamp": chrono::Utc::now(),
        });
        self.bridge
            .publish(&user_job_list_channel(user_id), JOB_LIST_EVENT, &data)
            .await;
    }
}
