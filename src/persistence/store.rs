//! The SQLite-backed implementation of the persistence service.

use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use uuid::Uuid;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::model::{
    ApprovalRequest, Execution, ExecutionStatus, StepExecution, StepExecutionStatus,
    WorkflowDefinition,
};

use super::rows::{
    approval_from_row, execution_from_row, execution_status_str, step_execution_from_row,
    step_status_str, workflow_definition_from_row,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("src/persistence/migrations");

/// Single point of truth for all durable state. Holds no business logic —
/// callers decide what a status transition *means*; this only records it.
#[derive(Clone)]
pub struct SqlStore {
    pool: SqlitePool,
}

impl SqlStore {
    /// Open (creating if absent) the database at `path` and run embedded
    /// migrations. `:memory:` is accepted for tests.
    pub async fn connect(path: &str) -> OrchestratorResult<Self> {
        let url = if path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{path}?mode=rwc")
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&url)
            .await?;
        MIGRATOR.run(&pool).await.map_err(|e| {
            OrchestratorError::Internal(format!("failed to run migrations: {e}"))
        })?;
        Ok(Self { pool })
    }

    // -- workflow definitions -------------------------------------------

    pub async fn save_definition(&self, def: &WorkflowDefinition) -> OrchestratorResult<()> {
        let json = serde_json::to_string(def)
            .map_err(|e| OrchestratorError::Internal(format!("failed to serialize definition: {e}")))?;
        sqlx::query(
            "INSERT INTO workflow_definition (workflow_id, name, version, definition_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(workflow_id) DO UPDATE SET
                name = excluded.name,
                version = excluded.version,
                definition_json = excluded.definition_json",
        )
        .bind(&def.workflow_id)
        .bind(&def.name)
        .bind(&def.version)
        .bind(&json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_definition(&self, workflow_id: &str) -> OrchestratorResult<WorkflowDefinition> {
        let row = sqlx::query("SELECT definition_json FROM workflow_definition WHERE workflow_id = ?1")
            .bind(workflow_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("workflow {workflow_id}")))?;
        workflow_definition_from_row(&row)
    }

    // -- executions -------------------------------------------------------

    pub async fn create_execution(&self, execution: &Execution) -> OrchestratorResult<()> {
        let initial_context = serde_json::to_string(&execution.initial_context)
            .map_err(|e| OrchestratorError::Internal(format!("failed to serialize context: {e}")))?;
        let step_order = serde_json::to_string(&execution.step_order)
            .map_err(|e| OrchestratorError::Internal(format!("failed to serialize step_order: {e}")))?;
        let dag_edges = serde_json::to_string(&execution.dag_edges)
            .map_err(|e| OrchestratorError::Internal(format!("failed to serialize dag_edges: {e}")))?;

        sqlx::query(
            "INSERT INTO workflow_execution
                (execution_id, workflow_id, workflow_name, initial_context, status,
                 started_at, completed_at, error_message, step_order_json, dag_edges_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, NULL, ?7, ?8)",
        )
        .bind(execution.execution_id.to_string())
        .bind(&execution.workflow_id)
        .bind(&execution.workflow_name)
        .bind(&initial_context)
        .bind(execution_status_str(execution.status))
        .bind(execution.started_at.to_rfc3339())
        .bind(&step_order)
        .bind(&dag_edges)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_execution_status(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        error_message: Option<&str>,
    ) -> OrchestratorResult<()> {
        let completed_at = status.is_terminal().then(|| Utc::now().to_rfc3339());
        sqlx::query(
            "UPDATE workflow_execution
             SET status = ?2, completed_at = ?3, error_message = ?4
             WHERE execution_id = ?1",
        )
        .bind(execution_id.to_string())
        .bind(execution_status_str(status))
        .bind(completed_at)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_execution(&self, execution_id: Uuid) -> OrchestratorResult<Execution> {
        let row = sqlx::query("SELECT * FROM workflow_execution WHERE execution_id = ?1")
            .bind(execution_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("execution {execution_id}")))?;
        execution_from_row(&row)
    }

    /// Executions in `running` or `paused` status, used on startup to
    /// identify what can be resumed after a restart.
    pub async fn get_resumable_executions(&self) -> OrchestratorResult<Vec<Execution>> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_execution WHERE status IN ('running', 'paused', 'paused_waiting_for_approval')",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(execution_from_row).collect()
    }

    /// Every execution of a given workflow, used by the history analyzer to
    /// aggregate step outcomes across runs.
    pub async fn get_executions_by_workflow(&self, workflow_id: &str) -> OrchestratorResult<Vec<Execution>> {
        let rows = sqlx::query("SELECT * FROM workflow_execution WHERE workflow_id = ?1")
            .bind(workflow_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(execution_from_row).collect()
    }

    // -- step executions ---------------------------------------------------

    pub async fn upsert_step_execution(&self, step: &StepExecution) -> OrchestratorResult<()> {
        let result_json = step
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| OrchestratorError::Internal(format!("failed to serialize result: {e}")))?;
        let attempt_history = serde_json::to_string(&step.attempt_history)
            .map_err(|e| OrchestratorError::Internal(format!("failed to serialize attempt_history: {e}")))?;

        sqlx::query(
            "INSERT INTO workflow_step_execution
                (execution_id, step_id, status, retry_count, started_at, completed_at,
                 error_message, result_json, attempt_history_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(execution_id, step_id) DO UPDATE SET
                status = excluded.status,
                retry_count = excluded.retry_count,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                error_message = excluded.error_message,
                result_json = excluded.result_json,
                attempt_history_json = excluded.attempt_history_json",
        )
        .bind(step.execution_id.to_string())
        .bind(&step.step_id)
        .bind(step_status_str(step.status))
        .bind(step.retry_count as i64)
        .bind(step.started_at.map(|t| t.to_rfc3339()))
        .bind(step.completed_at.map(|t| t.to_rfc3339()))
        .bind(&step.error_message)
        .bind(&result_json)
        .bind(&attempt_history)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_step_execution(&self, execution_id: Uuid, step_id: &str) -> OrchestratorResult<StepExecution> {
        let row = sqlx::query("SELECT * FROM workflow_step_execution WHERE execution_id = ?1 AND step_id = ?2")
            .bind(execution_id.to_string())
            .bind(step_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("step {step_id} of execution {execution_id}")))?;
        step_execution_from_row(&row)
    }

    pub async fn get_step_executions_for(&self, execution_id: Uuid) -> OrchestratorResult<Vec<StepExecution>> {
        let rows = sqlx::query("SELECT * FROM workflow_step_execution WHERE execution_id = ?1")
            .bind(execution_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(step_execution_from_row).collect()
    }

    /// The id of the last `completed` step in declared order, used to
    /// resume a sequential workflow past already-finished work.
    pub async fn get_last_completed_step_id(&self, execution_id: Uuid) -> OrchestratorResult<Option<String>> {
        let execution = self.get_execution(execution_id).await?;
        let completed = self.get_step_executions_for(execution_id).await?;
        let completed_ids: std::collections::HashSet<&str> = completed
            .iter()
            .filter(|s| s.status == StepExecutionStatus::Completed)
            .map(|s| s.step_id.as_str())
            .collect();
        Ok(execution
            .step_order
            .iter()
            .rev()
            .find(|id| completed_ids.contains(id.as_str()))
            .cloned())
    }

    pub async fn get_step_status(&self, execution_id: Uuid, step_id: &str) -> OrchestratorResult<Option<StepExecutionStatus>> {
        let row = sqlx::query("SELECT status FROM workflow_step_execution WHERE execution_id = ?1 AND step_id = ?2")
            .bind(execution_id.to_string())
            .bind(step_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let status: String = row.try_get("status")?;
                Ok(Some(match status.as_str() {
                    "running" => StepExecutionStatus::Running,
                    "completed" => StepExecutionStatus::Completed,
                    "failed" => StepExecutionStatus::Failed,
                    _ => StepExecutionStatus::Skipped,
                }))
            }
            None => Ok(None),
        }
    }

    pub async fn get_initial_context(&self, execution_id: Uuid) -> OrchestratorResult<serde_json::Value> {
        Ok(self.get_execution(execution_id).await?.initial_context)
    }

    // -- approvals ----------------------------------------------------------

    pub async fn create_approval(&self, approval: &ApprovalRequest) -> OrchestratorResult<()> {
        let allowed_actions = serde_json::to_string(&approval.allowed_actions)
            .map_err(|e| OrchestratorError::Internal(format!("failed to serialize allowed_actions: {e}")))?;
        sqlx::query(
            "INSERT INTO workflow_approval
                (execution_id, step_id, prompt, allowed_actions_json, requested_at,
                 decision, actor_id, comment, resolved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, NULL, NULL, NULL)",
        )
        .bind(approval.execution_id.to_string())
        .bind(&approval.step_id)
        .bind(&approval.prompt)
        .bind(&allowed_actions)
        .bind(approval.requested_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Idempotent: a second call for an already-resolved request is a no-op
    /// that returns the existing (first) resolution, never an error.
    pub async fn resolve_approval(
        &self,
        execution_id: Uuid,
        step_id: &str,
        decision: &str,
        actor_id: &str,
        comment: Option<&str>,
    ) -> OrchestratorResult<ApprovalRequest> {
        let existing = self.get_approval(execution_id, step_id).await?;
        if existing.is_resolved() {
            return Ok(existing);
        }
        sqlx::query(
            "UPDATE workflow_approval
             SET decision = ?3, actor_id = ?4, comment = ?5, resolved_at = ?6
             WHERE execution_id = ?1 AND step_id = ?2 AND decision IS NULL",
        )
        .bind(execution_id.to_string())
        .bind(step_id)
        .bind(decision)
        .bind(actor_id)
        .bind(comment)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        self.get_approval(execution_id, step_id).await
    }

    pub async fn get_approval(&self, execution_id: Uuid, step_id: &str) -> OrchestratorResult<ApprovalRequest> {
        let row = sqlx::query("SELECT * FROM workflow_approval WHERE execution_id = ?1 AND step_id = ?2")
            .bind(execution_id.to_string())
            .bind(step_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("approval for {step_id} of execution {execution_id}")))?;
        approval_from_row(&row)
    }

    pub async fn get_pending_approvals(&self) -> OrchestratorResult<Vec<ApprovalRequest>> {
        let rows = sqlx::query("SELECT * FROM workflow_approval WHERE decision IS NULL")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(approval_from_row).collect()
    }

    // -- advisory audit (append-only: no UPDATE statement ever targets these) --

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_suggestion_audit(
        &self,
        suggestion_id: Uuid,
        category: &str,
        decision: &str,
        reason: &str,
        confidence: f64,
        source_execution_id: Option<Uuid>,
    ) -> OrchestratorResult<()> {
        sqlx::query(
            "INSERT INTO ai_suggestion_audit
                (suggestion_id, category, decision, reason, confidence, source_execution_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(suggestion_id.to_string())
        .bind(category)
        .bind(decision)
        .bind(reason)
        .bind(confidence)
        .bind(source_execution_id.map(|id| id.to_string()))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_guardrail_audit(
        &self,
        record_id: Uuid,
        record_kind: &str,
        decision: &str,
        reason: &str,
        confidence: f64,
        source_execution_id: Option<Uuid>,
    ) -> OrchestratorResult<()> {
        sqlx::query(
            "INSERT INTO ai_guardrail_audit
                (record_id, record_kind, decision, reason, confidence, source_execution_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(record_id.to_string())
        .bind(record_kind)
        .bind(decision)
        .bind(reason)
        .bind(confidence)
        .bind(source_execution_id.map(|id| id.to_string()))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_draft_audit(
        &self,
        draft_id: Uuid,
        category: &str,
        decision: &str,
        reason: &str,
        confidence: f64,
        content_hash: &str,
    ) -> OrchestratorResult<()> {
        sqlx::query(
            "INSERT INTO ai_draft_audit
                (draft_id, category, decision, reason, confidence, content_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(draft_id.to_string())
        .bind(category)
        .bind(decision)
        .bind(reason)
        .bind(confidence)
        .bind(content_hash)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttemptRecord, StepExecution};

    async fn memory_store() -> SqlStore {
        SqlStore::connect(":memory:").await.unwrap()
    }

    fn sample_definition() -> WorkflowDefinition {
        WorkflowDefinition {
            workflow_id: "wf-1".to_string(),
            name: "sample".to_string(),
            version: "1.0".to_string(),
            steps: vec![crate::model::StepDefinition {
                step_id: "a".to_string(),
                step_type: crate::model::StepType::InternalOp,
                input_mapping: serde_json::json!({}),
                retry_policy: crate::model::RetryPolicy::default(),
                on_failure: crate::model::OnFailure::Fail,
                depends_on: Default::default(),
                prompt: None,
                allowed_actions: None,
                timeout_policy: None,
                timeout_ms: None,
            }],
            max_parallelism: None,
        }
    }

    #[tokio::test]
    async fn round_trips_a_workflow_definition() {
        let store = memory_store().await;
        let def = sample_definition();
        store.save_definition(&def).await.unwrap();
        let loaded = store.load_definition("wf-1").await.unwrap();
        assert_eq!(loaded.workflow_id, "wf-1");
        assert_eq!(loaded.steps.len(), 1);
    }

    #[tokio::test]
    async fn loading_an_unknown_workflow_is_not_found() {
        let store = memory_store().await;
        let result = store.load_definition("ghost").await;
        assert!(matches!(result, Err(OrchestratorError::NotFound(_))));
    }

    #[tokio::test]
    async fn create_and_fetch_execution_round_trips() {
        let store = memory_store().await;
        let execution_id = Uuid::new_v4();
        let execution = Execution {
            execution_id,
            workflow_id: "wf-1".to_string(),
            workflow_name: "sample".to_string(),
            initial_context: serde_json::json!({"x": 1}),
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
            step_order: vec!["a".to_string()],
            dag_edges: vec![],
        };
        store.create_execution(&execution).await.unwrap();
        let loaded = store.get_execution(execution_id).await.unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Running);
        assert_eq!(loaded.step_order, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn updating_status_to_terminal_sets_completed_at() {
        let store = memory_store().await;
        let execution_id = Uuid::new_v4();
        let execution = Execution {
            execution_id,
            workflow_id: "wf-1".to_string(),
            workflow_name: "sample".to_string(),
            initial_context: serde_json::json!({}),
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
            step_order: vec![],
            dag_edges: vec![],
        };
        store.create_execution(&execution).await.unwrap();
        store
            .update_execution_status(execution_id, ExecutionStatus::Completed, None)
            .await
            .unwrap();
        let loaded = store.get_execution(execution_id).await.unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Completed);
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn resolving_approval_twice_is_idempotent() {
        let store = memory_store().await;
        let execution_id = Uuid::new_v4();
        let approval = ApprovalRequest::new(execution_id, "h", "approve?", vec!["APPROVE".into(), "REJECT".into()]);
        store.create_approval(&approval).await.unwrap();

        let first = store
            .resolve_approval(execution_id, "h", "APPROVE", "alice", None)
            .await
            .unwrap();
        assert_eq!(first.decision.as_deref(), Some("APPROVE"));

        let second = store
            .resolve_approval(execution_id, "h", "REJECT", "bob", Some("too late"))
            .await
            .unwrap();
        assert_eq!(second.decision.as_deref(), Some("APPROVE"));
        assert_eq!(second.actor_id.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn pending_approvals_excludes_resolved() {
        let store = memory_store().await;
        let execution_id = Uuid::new_v4();
        let a = ApprovalRequest::new(execution_id, "h1", "approve?", vec!["APPROVE".into()]);
        let b = ApprovalRequest::new(execution_id, "h2", "approve?", vec!["APPROVE".into()]);
        store.create_approval(&a).await.unwrap();
        store.create_approval(&b).await.unwrap();
        store.resolve_approval(execution_id, "h1", "APPROVE", "alice", None).await.unwrap();

        let pending = store.get_pending_approvals().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].step_id, "h2");
    }

    #[tokio::test]
    async fn last_completed_step_id_follows_declared_order() {
        let store = memory_store().await;
        let execution_id = Uuid::new_v4();
        let execution = Execution {
            execution_id,
            workflow_id: "wf-1".to_string(),
            workflow_name: "sample".to_string(),
            initial_context: serde_json::json!({}),
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
            step_order: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            dag_edges: vec![],
        };
        store.create_execution(&execution).await.unwrap();

        let mut a = StepExecution::new(execution_id, "a");
        a.status = StepExecutionStatus::Completed;
        store.upsert_step_execution(&a).await.unwrap();

        let mut b = StepExecution::new(execution_id, "b");
        b.status = StepExecutionStatus::Completed;
        store.upsert_step_execution(&b).await.unwrap();

        let last = store.get_last_completed_step_id(execution_id).await.unwrap();
        assert_eq!(last.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn step_execution_retains_attempt_history() {
        let store = memory_store().await;
        let execution_id = Uuid::new_v4();
        let mut step = StepExecution::new(execution_id, "a");
        step.attempt_history.push(AttemptRecord {
            attempt: 1,
            error: Some("timeout".to_string()),
            at: Utc::now(),
        });
        step.retry_count = 1;
        store.upsert_step_execution(&step).await.unwrap();

        let loaded = store.get_step_execution(execution_id, "a").await.unwrap();
        assert_eq!(loaded.attempt_history.len(), 1);
        assert_eq!(loaded.retry_count, 1);
    }

    #[tokio::test]
    async fn append_only_audit_tables_accept_inserts() {
        let store = memory_store().await;
        store
            .insert_suggestion_audit(Uuid::new_v4(), "OPTIMIZATION", "ALLOW", "looks fine", 0.8, None)
            .await
            .unwrap();
        store
            .insert_guardrail_audit(Uuid::new_v4(), "suggestion", "FLAG", "low confidence", 0.2, None)
            .await
            .unwrap();
        store
            .insert_draft_audit(Uuid::new_v4(), "REMEDIATION", "ALLOW", "ok", 0.9, "abc123")
            .await
            .unwrap();
    }
}
