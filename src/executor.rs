//! Workflow executor: sequential ordering and DAG scheduling with bounded
//! parallelism, the largest single component in the core. Each execution
//! runs on its own background task; the executor itself only holds the
//! shared services and the definition/active-run caches, both concurrent
//! maps.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::approval::ApprovalService;
use crate::dispatcher::Dispatcher;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::event_bus::EventBus;
use crate::input_mapping;
use crate::model::{
    AttemptRecord, Execution, ExecutionStatus, OnFailure, StepDefinition, StepExecution,
    StepExecutionStatus, StepType, TimeoutPolicy, WorkflowDefinition,
};
use crate::persistence::SqlStore;

/// Shared services a running execution needs, grouped so `run_execution`
/// doesn't thread five separate `Arc`s through every helper.
pub struct WorkflowExecutor {
    store: Arc<SqlStore>,
    dispatcher: Arc<Dispatcher>,
    approval: Arc<ApprovalService>,
    event_bus: Arc<EventBus>,
    definitions: DashMap<String, WorkflowDefinition>,
    /// Set false at shutdown; background fibers check this at their next
    /// scheduling point and pause rather than submit new work.
    running: Arc<AtomicBool>,
}

impl WorkflowExecutor {
    pub fn new(store: Arc<SqlStore>, dispatcher: Arc<Dispatcher>, approval: Arc<ApprovalService>, event_bus: Arc<EventBus>) -> Self {
        Self {
            store,
            dispatcher,
            approval,
            event_bus,
            definitions: DashMap::new(),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn request_shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Exposed for callers (the trigger service's tests, `GET_WORKFLOW_STATUS`)
    /// that need to read persisted state without duplicating the executor's
    /// own store handle.
    pub fn store(&self) -> &Arc<SqlStore> {
        &self.store
    }

    /// Validate, cache in memory, and persist a workflow definition on
    /// `LOAD_WORKFLOW`. Rejected definitions persist nothing.
    pub async fn load_workflow(&self, def: WorkflowDefinition) -> OrchestratorResult<String> {
        def.validate()?;
        self.store.save_definition(&def).await?;
        let workflow_id = def.workflow_id.clone();
        self.definitions.insert(workflow_id.clone(), def);
        Ok(workflow_id)
    }

    fn cached_definition(&self, workflow_id: &str) -> Option<WorkflowDefinition> {
        self.definitions.get(workflow_id).map(|e| e.clone())
    }

    async fn definition_for(&self, workflow_id: &str) -> OrchestratorResult<WorkflowDefinition> {
        if let Some(def) = self.cached_definition(workflow_id) {
            return Ok(def);
        }
        let def = self.store.load_definition(workflow_id).await?;
        self.definitions.insert(workflow_id.to_string(), def.clone());
        Ok(def)
    }

    /// Start a new execution and run it to completion or its first
    /// suspension point. Returns immediately with the execution id; the
    /// run itself proceeds on a spawned background task.
    pub async fn start_workflow(
        self: &Arc<Self>,
        workflow_id: &str,
        initial_context: serde_json::Value,
    ) -> OrchestratorResult<Uuid> {
        let def = self.definition_for(workflow_id).await?;
        let execution_id = Uuid::new_v4();
        let dag_edges: Vec<(String, String)> = def
            .steps
            .iter()
            .flat_map(|s| s.depends_on.iter().map(move |dep| (dep.clone(), s.step_id.clone())))
            .collect();
        let execution = Execution {
            execution_id,
            workflow_id: def.workflow_id.clone(),
            workflow_name: def.name.clone(),
            initial_context,
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
            step_order: def.steps.iter().map(|s| s.step_id.clone()).collect(),
            dag_edges,
        };
        self.store.create_execution(&execution).await?;
        self.event_bus.publish("workflow.started", serde_json::json!({
            "execution_id": execution_id,
            "workflow_id": def.workflow_id,
        }));

        let this = self.clone();
        tokio::spawn(async move {
            this.run(execution_id).await;
        });

        Ok(execution_id)
    }

    /// Called once at startup for every execution in `running` or `paused`
    /// status. `paused_waiting_for_approval` executions are not resumed
    /// here — they revive only on `RESOLVE_APPROVAL`.
    pub async fn resume_pending(self: &Arc<Self>) -> OrchestratorResult<usize> {
        let resumable = self.store.get_resumable_executions().await?;
        let mut resumed = 0;
        for execution in resumable {
            if execution.status == ExecutionStatus::PausedWaitingForApproval {
                continue;
            }
            self.definition_for(&execution.workflow_id).await?;
            let this = self.clone();
            let execution_id = execution.execution_id;
            tokio::spawn(async move {
                this.run(execution_id).await;
            });
            resumed += 1;
        }
        Ok(resumed)
    }

    /// Revive an execution paused on a HUMAN_APPROVAL step once its
    /// decision has been recorded by an external `RESOLVE_APPROVAL` request.
    pub async fn resume_after_approval(self: &Arc<Self>, execution_id: Uuid) {
        let this = self.clone();
        tokio::spawn(async move {
            this.run(execution_id).await;
        });
    }

    #[instrument(skip(self), fields(execution_id = %execution_id))]
    async fn run(self: Arc<Self>, execution_id: Uuid) {
        let execution = match self.store.get_execution(execution_id).await {
            Ok(e) => e,
            Err(e) => {
                error!(error = %e, "cannot run execution: failed to load it");
                return;
            }
        };
        if execution.status.is_terminal() {
            return;
        }

        let def = match self.definition_for(&execution.workflow_id).await {
            Ok(d) => d,
            Err(e) => {
                error!(error = %e, "cannot run execution: failed to load its definition");
                return;
            }
        };

        let outcome = if def.is_dag() {
            self.run_dag(&execution, &def).await
        } else {
            self.run_sequential(&execution, &def).await
        };

        match outcome {
            Outcome::Completed => self.finalize(execution_id, ExecutionStatus::Completed, None).await,
            Outcome::Failed(reason) => self.finalize(execution_id, ExecutionStatus::Failed, Some(reason)).await,
            Outcome::PausedForApproval | Outcome::ShuttingDown => {
                // Persisted status already reflects the pause; nothing further to do.
            }
        }
    }

    async fn finalize(&self, execution_id: Uuid, status: ExecutionStatus, error_message: Option<String>) {
        if let Err(e) = self
            .store
            .update_execution_status(execution_id, status, error_message.as_deref())
            .await
        {
            error!(execution_id = %execution_id, error = %e, "failed to persist final execution status");
        }
        self.event_bus.publish(
            "workflow.finished",
            serde_json::json!({"execution_id": execution_id, "status": status}),
        );
    }

    // -- sequential mode ---------------------------------------

    async fn run_sequential(self: &Arc<Self>, execution: &Execution, def: &WorkflowDefinition) -> Outcome {
        let mut step_results: HashMap<String, serde_json::Value> = HashMap::new();
        for step_id in &execution.step_order {
            if let Ok(prior) = self.store.get_step_execution(execution.execution_id, step_id).await {
                if prior.status == StepExecutionStatus::Completed || prior.status == StepExecutionStatus::Skipped {
                    step_results.insert(step_id.clone(), prior.result.unwrap_or(serde_json::Value::Null));
                }
            }
        }

        for step in &def.steps {
            if step_results.contains_key(&step.step_id) {
                continue;
            }
            if !self.running.load(Ordering::SeqCst) {
                let _ = self
                    .store
                    .update_execution_status(execution.execution_id, ExecutionStatus::Paused, None)
                    .await;
                return Outcome::ShuttingDown;
            }

            match self.run_one_step(execution, step, &step_results).await {
                StepOutcome::Completed(result) => {
                    step_results.insert(step.step_id.clone(), result);
                }
                StepOutcome::Skipped => {
                    step_results.insert(step.step_id.clone(), serde_json::Value::Null);
                }
                StepOutcome::Failed(reason) => return Outcome::Failed(reason),
                StepOutcome::PausedForApproval => return Outcome::PausedForApproval,
            }
        }
        Outcome::Completed
    }

    // -- DAG mode ----------------------------------------------

    async fn run_dag(self: &Arc<Self>, execution: &Execution, def: &WorkflowDefinition) -> Outcome {
        let by_id: HashMap<&str, &StepDefinition> = def.steps.iter().map(|s| (s.step_id.as_str(), s)).collect();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        let mut remaining_deps: HashMap<String, usize> = HashMap::new();
        for step in &def.steps {
            remaining_deps.insert(step.step_id.clone(), step.depends_on.len());
            for dep in &step.depends_on {
                dependents.entry(dep.clone()).or_default().push(step.step_id.clone());
            }
        }

        let mut step_results: HashMap<String, serde_json::Value> = HashMap::new();
        let mut terminal: HashSet<String> = HashSet::new();

        // Seed prior terminal state from the store, for resumed DAG runs.
        for step in &def.steps {
            if let Ok(prior) = self.store.get_step_execution(execution.execution_id, &step.step_id).await {
                if prior.status.is_terminal() {
                    terminal.insert(step.step_id.clone());
                    if matches!(prior.status, StepExecutionStatus::Completed | StepExecutionStatus::Skipped) {
                        step_results.insert(step.step_id.clone(), prior.result.unwrap_or(serde_json::Value::Null));
                        for dependent in dependents.get(&step.step_id).cloned().unwrap_or_default() {
                            if let Some(n) = remaining_deps.get_mut(&dependent) {
                                *n = n.saturating_sub(1);
                            }
                        }
                    }
                }
            }
        }

        let state = Arc::new(Mutex::new(DagState {
            remaining_deps,
            step_results,
            terminal,
        }));

        let max_parallelism = def.max_parallelism.unwrap_or(def.steps.len()).max(1);

        loop {
            if !self.running.load(Ordering::SeqCst) {
                let _ = self
                    .store
                    .update_execution_status(execution.execution_id, ExecutionStatus::Paused, None)
                    .await;
                return Outcome::ShuttingDown;
            }

            let runnable = {
                let guard = state.lock().await;
                if guard.terminal.len() == def.steps.len() {
                    break;
                }
                let mut ready: Vec<&str> = guard
                    .remaining_deps
                    .iter()
                    .filter(|(id, &n)| n == 0 && !guard.terminal.contains(id.as_str()))
                    .map(|(id, _)| id.as_str())
                    .collect();
                ready.sort_unstable();
                ready.truncate(max_parallelism);
                ready.into_iter().map(str::to_string).collect::<Vec<_>>()
            };

            if runnable.is_empty() {
                let guard = state.lock().await;
                if guard.terminal.len() < def.steps.len() {
                    warn!(execution_id = %execution.execution_id, "DAG execution stuck: no runnable steps but some remain non-terminal");
                    return Outcome::Failed("DAG stuck: empty runnable set with non-terminal steps remaining".to_string());
                }
                break;
            }

            let mut futures = FuturesUnordered::new();
            for step_id in &runnable {
                let step = *by_id.get(step_id.as_str()).expect("runnable step must exist in definition");
                let state = state.clone();
                futures.push(async move {
                    let inputs = {
                        let guard = state.lock().await;
                        guard.step_results.clone()
                    };
                    let outcome = self.run_one_step(execution, step, &inputs).await;
                    (step.step_id.clone(), step.on_failure, outcome)
                });
            }

            while let Some((step_id, on_failure, outcome)) = futures.next().await {
                match outcome {
                    StepOutcome::Completed(result) => {
                        let mut guard = state.lock().await;
                        guard.terminal.insert(step_id.clone());
                        guard.step_results.insert(step_id.clone(), result);
                        for dependent in dependents.get(&step_id).cloned().unwrap_or_default() {
                            if let Some(n) = guard.remaining_deps.get_mut(&dependent) {
                                *n = n.saturating_sub(1);
                            }
                        }
                    }
                    StepOutcome::Skipped => {
                        let mut guard = state.lock().await;
                        guard.terminal.insert(step_id.clone());
                        // A SKIPped step satisfies its dependents the same
                        // as a completed one. Downstream references resolve
                        // against a null placeholder.
                        guard.step_results.insert(step_id.clone(), serde_json::Value::Null);
                        for dependent in dependents.get(&step_id).cloned().unwrap_or_default() {
                            if let Some(n) = guard.remaining_deps.get_mut(&dependent) {
                                *n = n.saturating_sub(1);
                            }
                        }
                    }
                    StepOutcome::Failed(reason) => {
                        let mut guard = state.lock().await;
                        guard.terminal.insert(step_id.clone());
                        drop(guard);
                        if on_failure == OnFailure::Fail || on_failure == OnFailure::Retry {
                            self.propagate_failure(execution.execution_id, &step_id, &dependents, &state).await;
                            return Outcome::Failed(reason);
                        }
                    }
                    StepOutcome::PausedForApproval => return Outcome::PausedForApproval,
                }
            }
        }

        Outcome::Completed
    }

    /// Mark every non-terminal descendant of a FAIL-terminated step as
    /// `failed`.
    async fn propagate_failure(
        &self,
        execution_id: Uuid,
        failed_step_id: &str,
        dependents: &HashMap<String, Vec<String>>,
        state: &Arc<Mutex<DagState>>,
    ) {
        let mut queue = vec![failed_step_id.to_string()];
        let mut visited = HashSet::new();
        while let Some(id) = queue.pop() {
            for dependent in dependents.get(&id).cloned().unwrap_or_default() {
                if !visited.insert(dependent.clone()) {
                    continue;
                }
                let mut guard = state.lock().await;
                if guard.terminal.insert(dependent.clone()) {
                    drop(guard);
                    let mut step = StepExecution::new(execution_id, dependent.clone());
                    step.status = StepExecutionStatus::Failed;
                    step.error_message = Some(format!("ancestor step {failed_step_id} failed"));
                    step.completed_at = Some(Utc::now());
                    if let Err(e) = self.store.upsert_step_execution(&step).await {
                        error!(execution_id = %execution_id, step_id = %dependent, error = %e, "failed to persist propagated step failure");
                    }
                } else {
                    drop(guard);
                }
                queue.push(dependent);
            }
        }
    }

    // -- per-step execution, shared by both scheduling modes ---------------

    async fn run_one_step(
        self: &Arc<Self>,
        execution: &Execution,
        step: &StepDefinition,
        step_results: &HashMap<String, serde_json::Value>,
    ) -> StepOutcome {
        if step.step_type == StepType::HumanApproval {
            return self.run_approval_step(execution, step).await;
        }

        let mut warnings = Vec::new();
        let resolved_input = input_mapping::resolve(&step.input_mapping, step_results, &execution.initial_context, &mut warnings);
        for w in &warnings {
            warn!(execution_id = %execution.execution_id, step_id = %step.step_id, "{w}");
        }

        let mut record = StepExecution::new(execution.execution_id, step.step_id.clone());
        record.started_at = Some(Utc::now());
        if let Err(e) = self.store.upsert_step_execution(&record).await {
            error!(execution_id = %execution.execution_id, step_id = %step.step_id, error = %e, "failed to persist step start");
        }

        let operation = match step.step_type {
            StepType::PythonTask => "PYTHON_TASK",
            StepType::ExternalApiCall => "EXTERNAL_API_CALL",
            StepType::InternalOp => "INTERNAL_OP",
            StepType::HumanApproval => unreachable!("handled above"),
        };

        let max_attempts = step.retry_policy.max_attempts.max(1);
        let mut last_error = None;
        let mut result = None;
        for attempt in 1..=max_attempts {
            match self.dispatcher.dispatch(operation, resolved_input.clone()).await {
                Ok(value) => {
                    result = Some(value);
                    break;
                }
                Err(e) => {
                    record.attempt_history.push(AttemptRecord {
                        attempt,
                        error: Some(e.to_string()),
                        at: Utc::now(),
                    });
                    last_error = Some(e.to_string());
                    if attempt < max_attempts {
                        record.retry_count += 1;
                        if step.retry_policy.backoff_ms > 0 {
                            tokio::time::sleep(Duration::from_millis(step.retry_policy.backoff_ms)).await;
                        }
                    }
                }
            }
        }

        record.completed_at = Some(Utc::now());

        if let Some(value) = result {
            record.status = StepExecutionStatus::Completed;
            record.result = Some(value.clone());
            if let Err(e) = self.store.upsert_step_execution(&record).await {
                error!(execution_id = %execution.execution_id, step_id = %step.step_id, error = %e, "failed to persist step completion");
            }
            self.event_bus.publish(
                "step.completed",
                serde_json::json!({"execution_id": execution.execution_id, "step_id": step.step_id}),
            );
            return StepOutcome::Completed(value);
        }

        let reason = last_error.unwrap_or_else(|| "unknown dispatcher failure".to_string());
        match step.on_failure {
            OnFailure::Skip => {
                record.status = StepExecutionStatus::Skipped;
                record.error_message = Some(reason);
                if let Err(e) = self.store.upsert_step_execution(&record).await {
                    error!(execution_id = %execution.execution_id, step_id = %step.step_id, error = %e, "failed to persist step skip");
                }
                StepOutcome::Skipped
            }
            OnFailure::Fail | OnFailure::Retry => {
                record.status = StepExecutionStatus::Failed;
                record.error_message = Some(reason.clone());
                if let Err(e) = self.store.upsert_step_execution(&record).await {
                    error!(execution_id = %execution.execution_id, step_id = %step.step_id, error = %e, "failed to persist step failure");
                }
                self.event_bus.publish(
                    "step.failed",
                    serde_json::json!({"execution_id": execution.execution_id, "step_id": step.step_id}),
                );
                StepOutcome::Failed(format!("step {} failed: {reason}", step.step_id))
            }
        }
    }

    async fn run_approval_step(self: &Arc<Self>, execution: &Execution, step: &StepDefinition) -> StepOutcome {
        if let Some(existing) = self.approval.existing_decision(execution.execution_id, &step.step_id).await {
            if existing.is_resolved() {
                let mut record = StepExecution::new(execution.execution_id, step.step_id.clone());
                record.started_at = existing.requested_at.into();
                record.completed_at = existing.resolved_at;
                if existing.is_approved() {
                    record.status = StepExecutionStatus::Completed;
                    record.result = Some(serde_json::json!({"decision": existing.decision}));
                    let _ = self.store.upsert_step_execution(&record).await;
                    return StepOutcome::Completed(record.result.unwrap());
                } else {
                    record.status = StepExecutionStatus::Failed;
                    record.error_message = Some(format!("approval resolved as {:?}", existing.decision));
                    let _ = self.store.upsert_step_execution(&record).await;
                    return StepOutcome::Failed(format!("step {} rejected by approval decision", step.step_id));
                }
            }
        }

        let prompt = step.prompt.clone().unwrap_or_default();
        let allowed = step.allowed_actions.clone().unwrap_or_default();
        if let Err(e) = self.approval.request(execution.execution_id, &step.step_id, &prompt, allowed).await {
            return StepOutcome::Failed(format!("failed to record approval request: {e}"));
        }

        let mut record = StepExecution::new(execution.execution_id, step.step_id.clone());
        record.started_at = Some(Utc::now());
        let _ = self.store.upsert_step_execution(&record).await;

        let _ = self
            .store
            .update_execution_status(execution.execution_id, ExecutionStatus::PausedWaitingForApproval, None)
            .await;

        if step.timeout_policy == Some(TimeoutPolicy::Fail) {
            if let Some(timeout_ms) = step.timeout_ms {
                let approval = self.approval.clone();
                let this = self.clone();
                let execution_id = execution.execution_id;
                let step_id = step.step_id.clone();
                // This task submits the same RESOLVE_APPROVAL any other
                // caller could submit, after the deadline, and — unlike an
                // external caller, whose resumption goes through the IPC
                // loop's own `resume_after_approval` call — must revive the
                // execution itself, since nothing else observes this timeout.
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
                    if approval.is_waiting(execution_id, &step_id) {
                        match approval.resolve_as_timed_out(execution_id, &step_id).await {
                            Ok((_, true)) => this.resume_after_approval(execution_id).await,
                            Ok((_, false)) => {}
                            Err(e) => {
                                error!(execution_id = %execution_id, step_id = %step_id, error = %e, "failed to resolve timed-out approval");
                            }
                        }
                    }
                });
            }
        }

        StepOutcome::PausedForApproval
    }
}

struct DagState {
    remaining_deps: HashMap<String, usize>,
    step_results: HashMap<String, serde_json::Value>,
    terminal: HashSet<String>,
}

enum Outcome {
    Completed,
    Failed(String),
    PausedForApproval,
    ShuttingDown,
}

enum StepOutcome {
    Completed(serde_json::Value),
    Skipped,
    Failed(String),
    PausedForApproval,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatcherConfig;
    use crate::model::{RetryPolicy, StepType};

    fn step(id: &str, deps: &[&str], on_failure: OnFailure) -> StepDefinition {
        StepDefinition {
            step_id: id.to_string(),
            step_type: StepType::InternalOp,
            input_mapping: serde_json::json!({}),
            retry_policy: RetryPolicy::default(),
            on_failure,
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            prompt: None,
            allowed_actions: None,
            timeout_policy: None,
            timeout_ms: None,
        }
    }

    async fn executor() -> Arc<WorkflowExecutor> {
        let store = Arc::new(SqlStore::connect(":memory:").await.unwrap());
        let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig::default()));
        let approval = Arc::new(ApprovalService::new(store.clone()));
        let event_bus = Arc::new(EventBus::default());
        Arc::new(WorkflowExecutor::new(store, dispatcher, approval, event_bus))
    }

    #[tokio::test]
    async fn loading_an_invalid_definition_persists_nothing() {
        let exec = executor().await;
        let def = WorkflowDefinition {
            workflow_id: "bad".to_string(),
            name: "t".to_string(),
            version: "1".to_string(),
            steps: vec![],
            max_parallelism: None,
        };
        let result = exec.load_workflow(def).await;
        assert!(result.is_err());
        assert!(exec.store.load_definition("bad").await.is_err());
    }

    #[tokio::test]
    async fn a_step_whose_worker_is_unregistered_fails_after_retries_are_exhausted() {
        let exec = executor().await;
        let def = WorkflowDefinition {
            workflow_id: "w1".to_string(),
            name: "t".to_string(),
            version: "1".to_string(),
            steps: vec![step("a", &[], OnFailure::Fail)],
            max_parallelism: None,
        };
        exec.load_workflow(def).await.unwrap();
        let execution_id = exec.start_workflow("w1", serde_json::json!({})).await.unwrap();

        // No worker process is registered with the dispatcher in this unit
        // test, so the dispatch itself fails immediately (WorkerDead) and
        // the background run finalizes without a real worker round trip.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let execution = exec.store.get_execution(execution_id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn skip_on_failure_lets_downstream_steps_proceed() {
        let exec = executor().await;
        let def = WorkflowDefinition {
            workflow_id: "w2".to_string(),
            name: "t".to_string(),
            version: "1".to_string(),
            steps: vec![step("a", &[], OnFailure::Skip), step("b", &["a"], OnFailure::Fail)],
            max_parallelism: None,
        };
        exec.load_workflow(def).await.unwrap();
        let execution_id = exec.start_workflow("w2", serde_json::json!({})).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let a = exec.store.get_step_execution(execution_id, "a").await.unwrap();
        assert_eq!(a.status, StepExecutionStatus::Skipped);
        let b = exec.store.get_step_execution(execution_id, "b").await;
        // b should have been attempted (and itself failed, since no worker
        // is registered) rather than left un-started, proving "a" being
        // skipped did not block it.
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn timeout_policy_fail_revives_and_terminates_the_execution() {
        let exec = executor().await;
        let mut approval_step = step("h", &[], OnFailure::Fail);
        approval_step.step_type = StepType::HumanApproval;
        approval_step.prompt = Some("approve?".to_string());
        approval_step.allowed_actions = Some(vec!["APPROVE".to_string(), "REJECT".to_string()]);
        approval_step.timeout_policy = Some(TimeoutPolicy::Fail);
        approval_step.timeout_ms = Some(20);
        let def = WorkflowDefinition {
            workflow_id: "w3".to_string(),
            name: "t".to_string(),
            version: "1".to_string(),
            steps: vec![approval_step],
            max_parallelism: None,
        };
        exec.load_workflow(def).await.unwrap();
        let execution_id = exec.start_workflow("w3", serde_json::json!({})).await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        let execution = exec.store.get_execution(execution_id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::PausedWaitingForApproval);

        // Past the deadline the timeout handler must both resolve the
        // approval as rejected and revive the execution itself, since no
        // external RESOLVE_APPROVAL call is coming to do it.
        tokio::time::sleep(Duration::from_millis(150)).await;
        let execution = exec.store.get_execution(execution_id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        let approval = exec.approval.get(execution_id, "h").await.unwrap();
        assert!(approval.is_resolved());
        assert!(!approval.is_approved());
    }
}
