//! Execution and Step Execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Paused,
    PausedWaitingForApproval,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepExecutionStatus {
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, StepExecutionStatus::Running)
    }
}

/// One failed-attempt record, appended on every retry so the persisted
/// history — not just the final status — reflects retry arithmetic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub workflow_name: String,
    pub initial_context: serde_json::Value,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Step ids in declared order, frozen at start time.
    pub step_order: Vec<String>,
    /// `(dependency, dependent)` edges, frozen at start time, so resume is
    /// defined against the workflow shape as it was when started even if
    /// the cached definition is later reloaded.
    pub dag_edges: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub execution_id: Uuid,
    pub step_id: String,
    pub status: StepExecutionStatus,
    pub retry_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub attempt_history: Vec<AttemptRecord>,
}

impl StepExecution {
    pub fn new(execution_id: Uuid, step_id: impl Into<String>) -> Self {
        Self {
            execution_id,
            step_id: step_id.into(),
            status: StepExecutionStatus::Running,
            retry_count: 0,
            started_at: None,
            completed_at: None,
            error_message: None,
            result: None,
            attempt_history: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_are_monotone_categories() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::PausedWaitingForApproval.is_terminal());
    }

    #[test]
    fn step_execution_starts_running() {
        let exec = StepExecution::new(Uuid::new_v4(), "a");
        assert_eq!(exec.status, StepExecutionStatus::Running);
        assert!(!exec.status.is_terminal());
    }
}
