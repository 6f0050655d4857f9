//! Typed events emitted by the executor and the job scheduler
//!
//! Execution events fan out to per-workflow local subscribers (the
//! websocket layer) and to the external realtime bridge; job updates go to
//! the shared jobs channel. Channel names live here so every transport
//! agrees on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::execution::{ExecutionStatus, LogStatus};
use crate::job::{Job, JobStatus, JobType};

/// Events produced while walking a workflow graph.
///
/// For a single execution these are delivered to any one subscriber in
/// emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    ExecutionStarted {
        execution_id: Uuid,
    },
    ExecutionFinished {
        execution_id: Uuid,
        status: ExecutionStatus,
    },
    NodeStarted {
        node_id: String,
        action: String,
    },
    NodeCompleted {
        node_id: String,
    },
    Log {
        node_id: String,
        status: LogStatus,
        message: Option<String>,
    },
}

/// Snapshot published on every job status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusUpdate {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub job_type: JobType,
    pub updated_at: DateTime<Utc>,
    pub data: Value,
}

impl JobStatusUpdate {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            job_type: job.job_type,
            updated_at: job.updated_at,
            data: serde_json::to_value(job).unwrap_or(Value::Null),
        }
    }
}

/// Shared channel for job status transitions.
pub const REFRESH_JOBS_CHANNEL: &str = "refresh-jobs";

/// Event name carried on [`REFRESH_JOBS_CHANNEL`].
pub const JOB_STATUS_EVENT: &str = "job-status-update";

/// Event name carried on the per-user job list channel.
pub const JOB_LIST_EVENT: &str = "job-list-update";

/// Per-user channel carrying full job list refreshes.
pub fn user_job_list_channel(user_id: Uuid) -> String {
    format!("user-{user_id}-job-list")
}

/// Per-workflow channel carrying execution events.
pub fn execution_channel(workflow_id: Uuid) -> String {
    format!("execution-{workflow_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_execution_event_wire_shape() {
        let event = ExecutionEvent::NodeStarted {
            node_id: "ack_email".into(),
            action: "email".into(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "node_started", "node_id": "ack_email", "action": "email"})
        );

        let log = ExecutionEvent::Log {
            node_id: "n1".into(),
            status: LogStatus::Retry,
            message: Some("Retry 1 failed: boom".into()),
        };
        let value = serde_json::to_value(&log).unwrap();
        assert_eq!(value["type"], "log");
        assert_eq!(value["status"], "retry");
    }

    #[test]
    fn test_job_update_snapshot() {
        let job = Job::new(JobType::EmailSend, Utc::now(), json!({"to": "a@b.c"}), None);
        let update = JobStatusUpdate::from_job(&job);
        assert_eq!(update.job_id, job.id);
        assert_eq!(update.status, JobStatus::Pending);
        assert_eq!(update.data["payload"]["to"], "a@b.c");
    }

    #[test]
    fn test_channel_names() {
        let id = Uuid::nil();
        assert_eq!(
            user_job_list_channel(id),
            "user-00000000-0000-0000-0000-000000000000-job-list"
        );
        assert_eq!(
            execution_channel(id),
            "execution-00000000-0000-0000-0000-000000000000"
        );
    }
}
