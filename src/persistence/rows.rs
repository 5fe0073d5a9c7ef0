//! Manual row <-> model mapping.
//!
//! SQLite has no native JSON column type, so structured fields are stored
//! as TEXT and parsed here rather than relying on `sqlx`'s compile-time
//! query macros (which would require a live database at build time).

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::model::{
    ApprovalRequest, AttemptRecord, Execution, ExecutionStatus, StepExecution, StepExecutionStatus,
    WorkflowDefinition,
};

fn parse_json<T: serde::de::DeserializeOwned>(text: &str, context: &str) -> OrchestratorResult<T> {
    serde_json::from_str(text)
        .map_err(|e| OrchestratorError::Internal(format!("corrupt {context} in store: {e}")))
}

fn parse_timestamp(text: &str) -> OrchestratorResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| OrchestratorError::Internal(format!("corrupt timestamp in store: {e}")))
}

pub fn workflow_definition_from_row(row: &SqliteRow) -> OrchestratorResult<WorkflowDefinition> {
    let json: String = row.try_get("definition_json")?;
    parse_json(&json, "workflow_definition")
}

pub fn execution_from_row(row: &SqliteRow) -> OrchestratorResult<Execution> {
    let execution_id: String = row.try_get("execution_id")?;
    let status: String = row.try_get("status")?;
    let started_at: String = row.try_get("started_at")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;
    let initial_context: String = row.try_get("initial_context")?;
    let step_order: String = row.try_get("step_order_json")?;
    let dag_edges: String = row.try_get("dag_edges_json")?;

    Ok(Execution {
        execution_id: uuid::Uuid::parse_str(&execution_id)
            .map_err(|e| OrchestratorError::Internal(format!("corrupt execution_id: {e}")))?,
        workflow_id: row.try_get("workflow_id")?,
        workflow_name: row.try_get("workflow_name")?,
        initial_context: parse_json(&initial_context, "initial_context")?,
        status: parse_execution_status(&status)?,
        started_at: parse_timestamp(&started_at)?,
        completed_at: completed_at.map(|s| parse_timestamp(&s)).transpose()?,
        error_message: row.try_get("error_message")?,
        step_order: parse_json(&step_order, "step_order")?,
        dag_edges: parse_json(&dag_edges, "dag_edges")?,
    })
}

pub fn step_execution_from_row(row: &SqliteRow) -> OrchestratorResult<StepExecution> {
    let execution_id: String = row.try_get("execution_id")?;
    let status: String = row.try_get("status")?;
    let started_at: Option<String> = row.try_get("started_at")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;
    let result_json: Option<String> = row.try_get("result_json")?;
    let attempt_history_json: String = row.try_get("attempt_history_json")?;

    Ok(StepExecution {
        execution_id: uuid::Uuid::parse_str(&execution_id)
            .map_err(|e| OrchestratorError::Internal(format!("corrupt execution_id: {e}")))?,
        step_id: row.try_get("step_id")?,
        status: parse_step_status(&status)?,
        retry_count: row.try_get::<i64, _>("retry_count")? as u32,
        started_at: started_at.map(|s| parse_timestamp(&s)).transpose()?,
        completed_at: completed_at.map(|s| parse_timestamp(&s)).transpose()?,
        error_message: row.try_get("error_message")?,
        result: result_json.map(|s| parse_json(&s, "step result")).transpose()?,
        attempt_history: parse_json::<Vec<AttemptRecord>>(&attempt_history_json, "attempt_history")?,
    })
}

pub fn approval_from_row(row: &SqliteRow) -> OrchestratorResult<ApprovalRequest> {
    let execution_id: String = row.try_get("execution_id")?;
    let requested_at: String = row.try_get("requested_at")?;
    let resolved_at: Option<String> = row.try_get("resolved_at")?;
    let allowed_actions_json: String = row.try_get("allowed_actions_json")?;

    Ok(ApprovalRequest {
        execution_id: uuid::Uuid::parse_str(&execution_id)
            .map_err(|e| OrchestratorError::Internal(format!("corrupt execution_id: {e}")))?,
        step_id: row.try_get("step_id")?,
        prompt: row.try_get("prompt")?,
        allowed_actions: parse_json(&allowed_actions_json, "allowed_actions")?,
        requested_at: parse_timestamp(&requested_at)?,
        decision: row.try_get("decision")?,
        actor_id: row.try_get("actor_id")?,
        comment: row.try_get("comment")?,
        resolved_at: resolved_at.map(|s| parse_timestamp(&s)).transpose()?,
    })
}

fn parse_execution_status(s: &str) -> OrchestratorResult<ExecutionStatus> {
    match s {
        "running" => Ok(ExecutionStatus::Running),
        "paused" => Ok(ExecutionStatus::Paused),
        "paused_waiting_for_approval" => Ok(ExecutionStatus::PausedWaitingForApproval),
        "completed" => Ok(ExecutionStatus::Completed),
        "failed" => Ok(ExecutionStatus::Failed),
        other => Err(OrchestratorError::Internal(format!("unknown execution status {other}"))),
    }
}

pub fn execution_status_str(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Running => "running",
        ExecutionStatus::Paused => "paused",
        ExecutionStatus::PausedWaitingForApproval => "paused_waiting_for_approval",
        ExecutionStatus::Completed => "completed",
        ExecutionStatus::Failed => "failed",
    }
}

fn parse_step_status(s: &str) -> OrchestratorResult<StepExecutionStatus> {
    match s {
        "running" => Ok(StepExecutionStatus::Running),
        "completed" => Ok(StepExecutionStatus::Completed),
        "failed" => Ok(StepExecutionStatus::Failed),
        "skipped" => Ok(StepExecutionStatus::Skipped),
        other => Err(OrchestratorError::Internal(format!("unknown step status {other}"))),
    }
}

pub fn step_status_str(status: StepExecutionStatus) -> &'static str {
    match status {
        StepExecutionStatus::Running => "running",
        StepExecutionStatus::Completed => "completed",
        StepExecutionStatus::Failed => "failed",
        StepExecutionStatus::Skipped => "skipped",
    }
}
