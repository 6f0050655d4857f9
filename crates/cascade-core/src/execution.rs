//! Execution records and their append-only log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle of one workflow run.
///
/// Transitions are monotone: `pending → running → (succeeded | failed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// One run of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub trigger_data: Value,
}

impl Execution {
    pub fn new(workflow_id: Uuid, trigger_data: Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_id,
            status: ExecutionStatus::Pending,
            started_at: None,
            finished_at: None,
            trigger_data,
        }
    }

    /// `pending → running`; stamps `started_at` exactly once.
    pub fn begin(&mut self) -> bool {
        if self.status != ExecutionStatus::Pending {
            return false;
        }
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        true
    }

    /// `running → succeeded | failed`; stamps `finished_at` exactly once.
    pub fn finish(&mut self, status: ExecutionStatus) -> bool {
        if self.status != ExecutionStatus::Running || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.finished_at = Some(Utc::now());
        true
    }
}

/// Per-node log line status. For any executed node the sequence is
/// `started, [retry]*, (completed | error)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Started,
    Retry,
    Completed,
    Error,
}

impl LogStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Retry => "retry",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(Self::Started),
            "retry" => Ok(Self::Retry),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown log status: {other}")),
        }
    }
}

/// Append-only log line for one node of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub id: i64,
    pub execution_id: Uuid,
    pub node_id: String,
    pub status: LogStatus,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}
