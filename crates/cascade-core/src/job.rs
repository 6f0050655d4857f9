//! Deferred/background work units owned by the scheduler
//!
//! A job's status is a strict state machine:
//!
//! ```text
//! pending ──(due & dispatch)──▶ running ──(handler ok)──▶ completed
//!    │                              │
//!    │                              └─(handler error)──▶ failed
//!    └─(cancel)──▶ cancelled
//! ```
//!
//! `completed`, `failed`, and `cancelled` are sinks; a running job cannot
//! be cancelled. Timestamps are stamped on each transition and never
//! change afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    WorkflowExecution,
    EmailSend,
    Delay,
    HttpRequest,
    Generic,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WorkflowExecution => "workflow_execution",
            Self::EmailSend => "email_send",
            Self::Delay => "delay",
            Self::HttpRequest => "http_request",
            Self::Generic => "generic",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Pending or running.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of deferred or background work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub job_type: JobType,
    pub status: JobStatus,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub payload: Value,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl Job {
    pub fn new(
        job_type: JobType,
        scheduled_at: DateTime<Utc>,
        payload: Value,
        user_id: Option<Uuid>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            user_id,
            job_type,
            status: JobStatus::Pending,
            scheduled_at,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            failed_at: None,
            cancelled_at: None,
            payload,
            result: None,
            error: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.scheduled_at <= now
    }

    /// `pending → running`.
    pub fn mark_running(&mut self) -> bool {
        if self.status != JobStatus::Pending {
            return false;
        }
        let now = Utc::now();
        self.status = JobStatus::Running;
        self.started_at = Some(now);
        self.updated_at = now;
        true
    }

    /// `running → completed`.
    pub fn mark_completed(&mut self, result: Option<Value>) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        let now = Utc::now();
        self.status = JobStatus::Completed;
        self.completed_at = Some(now);
        self.updated_at = now;
        self.result = result;
        true
    }

    /// `running → failed`.
    pub fn mark_failed(&mut self, error: impl Into<String>) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        let now = Utc::now();
        self.status = JobStatus::Failed;
        self.failed_at = Some(now);
        self.updated_at = now;
        self.error = Some(error.into());
        true
    }

    /// `pending → cancelled`. Running jobs run to completion.
    pub fn mark_cancelled(&mut self) -> bool {
        if self.status != JobStatus::Pending {
            return false;
        }
        let now = Utc::now();
        self.status = JobStatus::Cancelled;
        self.cancelled_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Timestamp of the terminal transition, if any.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at.or(self.failed_at).or(self.cancelled_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job() -> Job {
        Job::new(JobType::Delay, Utc::now(), json!({"seconds": 1}), None)
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut j = job();
        assert_eq!(j.status, JobStatus::Pending);
        assert!(j.mark_running());
        assert!(j.started_at.is_some());
        assert!(j.mark_completed(Some(json!({"ok": true}))));
        assert!(j.completed_at.is_some());
        assert_eq!(j.result, Some(json!({"ok": true})));
        assert!(j.status.is_terminal());
    }

    #[test]
    fn test_failure_records_error() {
        let mut j = job();
        j.mark_running();
        assert!(j.mark_failed("boom"));
        assert_eq!(j.error.as_deref(), Some("boom"));
        assert!(j.failed_at.is_some());
        assert!(j.completed_at.is_none());
    }

    #[test]
    fn test_cancel_only_from_pending() {
        let mut j = job();
        assert!(j.mark_cancelled());
        assert!(j.cancelled_at.is_some());

        let mut running = job();
        running.mark_running();
        assert!(!running.mark_cancelled());
        assert_eq!(running.status, JobStatus::Running);
    }

    #[test]
    fn test_terminal_states_are_sinks() {
        let mut j = job();
        j.mark_running();
        j.mark_completed(None);
        let completed_at = j.completed_at;
        assert!(!j.mark_failed("late"));
        assert!(!j.mark_running());
        assert_eq!(j.completed_at, completed_at);
        assert!(j.error.is_none());
    }

    #[test]
    fn test_is_due_respects_schedule() {
        let mut j = job();
        j.scheduled_at = Utc::now() + chrono::Duration::seconds(60);
        assert!(!j.is_due(Utc::now()));
        assert!(j.is_due(Utc::now() + chrono::Duration::seconds(61)));

        j.mark_cancelled();
        assert!(!j.is_due(Utc::now() + chrono::Duration::seconds(120)));
    }

    #[test]
    fn test_timestamps_never_decrease() {
        let mut j = job();
        let created = j.created_at;
        j.mark_running();
        assert!(j.updated_at >= created);
        let after_start = j.updated_at;
        j.mark_failed("x");
        assert!(j.updated_at >= after_start);
    }
}
