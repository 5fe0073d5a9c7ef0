//! IPC request loop: parse, route, respond, shutdown.
//!
//! Reads JSON-lines requests from the parent process's stdin and writes
//! JSON-lines responses to stdout. Quick verbs (workflow/approval/query)
//! are handled synchronously inline; `START_WORKFLOW` hands off to a
//! background fiber inside [`crate::executor::WorkflowExecutor`] and
//! returns immediately with the freshly minted `execution_id`, with
//! lifecycle updates delivered separately over the event bus.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::advisory::AdvisoryService;
use crate::approval::ApprovalService;
use crate::dispatcher::{Dispatcher, WorkerRole};
use crate::error::{ErrorCode, OrchestratorError, OrchestratorResult};
use crate::executor::WorkflowExecutor;
use crate::guardrail::GuardrailEnforcer;
use crate::ipc::protocol::{IpcRequest, IpcResponse};
use crate::ipc::{LineReader, LineWriter};
use crate::model::WorkflowDefinition;
use crate::persistence::SqlStore;
use crate::supervisor::ProcessSupervisor;
use crate::trigger::TriggerService;

/// The id used to correlate a response to a request line that could not
/// even be parsed as JSON. This is the one place in the loop that uses a
/// catch-all to turn a parse fault into a `PARSE_ERROR` response.
const UNPARSEABLE_REQUEST_ID: &str = "unknown";

pub struct RequestLoop {
    executor: Arc<WorkflowExecutor>,
    approval: Arc<ApprovalService>,
    advisory: Arc<AdvisoryService>,
    guardrail: Arc<GuardrailEnforcer>,
    triggers: Arc<TriggerService>,
    dispatcher: Arc<Dispatcher>,
    supervisor: Arc<ProcessSupervisor>,
    store: Arc<SqlStore>,
    running: Arc<AtomicBool>,
}

impl RequestLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        executor: Arc<WorkflowExecutor>,
        approval: Arc<ApprovalService>,
        advisory: Arc<AdvisoryService>,
        guardrail: Arc<GuardrailEnforcer>,
        triggers: Arc<TriggerService>,
        dispatcher: Arc<Dispatcher>,
        supervisor: Arc<ProcessSupervisor>,
        store: Arc<SqlStore>,
    ) -> Self {
        Self {
            executor,
            approval,
            advisory,
            guardrail,
            triggers,
            dispatcher,
            supervisor,
            store,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Drive the loop to completion: read a line, dispatch it, write the
    /// response, repeat until stdin closes or a `SHUTDOWN` request sets the
    /// running flag to false and stops accepting new requests.
    pub async fn run<R, W>(&self, input: R, output: W)
    where
        R: tokio::io::AsyncRead + Unpin,
        W: tokio::io::AsyncWrite + Unpin,
    {
        let mut reader = LineReader::new(input);
        let writer = LineWriter::new(output);

        writer
            .write_value(&serde_json::to_value(crate::ipc::protocol::ReadyRecord::new()).unwrap())
            .await
            .ok();

        loop {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            match reader.next_value().await {
                Ok(None) => {
                    info!("parent closed stdin; shutting down");
                    break;
                }
                Ok(Some(value)) => {
                    let response = self.dispatch_value(value).await;
                    if let Ok(line) = serde_json::to_value(&response) {
                        if let Err(e) = writer.write_value(&line).await {
                            error!(error = %e, "failed to write response line");
                        }
                    }
                }
                Err(OrchestratorError::Parse(message)) => {
                    let response = IpcResponse::err(UNPARSEABLE_REQUEST_ID, ErrorCode::ParseError, message);
                    if let Ok(line) = serde_json::to_value(&response) {
                        let _ = writer.write_value(&line).await;
                    }
                }
                Err(e) => {
                    error!(error = %e, "fatal error reading request line; shutting down");
                    break;
                }
            }
        }
    }

    async fn dispatch_value(&self, value: serde_json::Value) -> IpcResponse {
        let request: IpcRequest = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(e) => return IpcResponse::err(UNPARSEABLE_REQUEST_ID, ErrorCode::ParseError, e.to_string()),
        };
        let id = request.id.clone();
        let result = self.handle(request).await;
        IpcResponse::from_result(id, result)
    }

    async fn handle(&self, request: IpcRequest) -> OrchestratorResult<serde_json::Value> {
        let payload = request.payload;
        match request.verb.as_str() {
            "SHUTDOWN" => {
                self.running.store(false, Ordering::SeqCst);
                self.executor.request_shutdown();
                self.supervisor.stop_all().await;
                Ok(json!({"shutting_down": true}))
            }
            "LOAD_WORKFLOW" => self.load_workflow(payload).await,
            "START_WORKFLOW" => self.start_workflow(payload).await,
            "GET_WORKFLOW_STATUS" => self.get_workflow_status(payload).await,
            "REGISTER_WORKFLOW_TRIGGER" => self.register_trigger(payload),
            "UNREGISTER_WORKFLOW_TRIGGER" => self.unregister_trigger(payload),
            "LIST_WORKFLOW_TRIGGERS" => Ok(json!({
                "triggers": self.triggers.list().into_iter().map(|(tag, workflow_id)| json!({
                    "event_tag": tag, "workflow_id": workflow_id,
                })).collect::<Vec<_>>(),
            })),
            "RESOLVE_APPROVAL" => self.resolve_approval(payload).await,
            "GET_PENDING_APPROVALS" => self.get_pending_approvals().await,
            "GET_AI_SUGGESTIONS" => self.get_ai_suggestions(payload).await,
            "GENERATE_DRAFT" => self.generate_draft(payload).await,
            "GET_STEP_EXECUTIONS" => self.get_step_executions(payload).await,
            "GET_WORKFLOW_DEFINITION" => self.get_workflow_definition(payload).await,
            "GET_METRICS" => self.get_metrics().await,
            "PING" | "HEALTH_CHECK" | "GET_STATUS" => self.broadcast_admin(&request.verb).await,
            other => Err(OrchestratorError::InvalidParams(format!("unrecognized verb {other}"))),
        }
    }

    async fn load_workflow(&self, payload: serde_json::Value) -> OrchestratorResult<serde_json::Value> {
        // Accept either a bare WorkflowDefinition as the payload, or one
        // nested under a "definition" field — both shapes are seen in
        // practice and accepted here rather than guessed away.
        let def: WorkflowDefinition = if let Some(nested) = payload.get("definition") {
            serde_json::from_value(nested.clone())
        } else {
            serde_json::from_value(payload)
        }
        .map_err(|e| OrchestratorError::InvalidParams(format!("invalid workflow definition: {e}")))?;

        let workflow_id = self.executor.load_workflow(def).await?;
        Ok(json!({"workflow_id": workflow_id}))
    }

    async fn start_workflow(&self, payload: serde_json::Value) -> OrchestratorResult<serde_json::Value> {
        let workflow_id = payload
            .get("workflow_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| OrchestratorError::InvalidParams("workflow_id is required".to_string()))?;
        let initial_context = payload.get("initial_context").cloned().unwrap_or(json!({}));
        let execution_id = self.executor.start_workflow(workflow_id, initial_context).await?;
        Ok(json!({"execution_id": execution_id, "workflow_id": workflow_id}))
    }

    async fn get_workflow_status(&self, payload: serde_json::Value) -> OrchestratorResult<serde_json::Value> {
        let execution_id = parse_execution_id(&payload)?;
        let execution = self.store.get_execution(execution_id).await?;
        serde_json::to_value(execution).map_err(|e| OrchestratorError::Internal(e.to_string()))
    }

    fn register_trigger(&self, payload: serde_json::Value) -> OrchestratorResult<serde_json::Value> {
        let event_tag = payload
            .get("event_tag")
            .and_then(|v| v.as_str())
            .ok_or_else(|| OrchestratorError::InvalidParams("event_tag is required".to_string()))?;
        let workflow_id = payload
            .get("workflow_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| OrchestratorError::InvalidParams("workflow_id is required".to_string()))?;
        self.triggers.register(event_tag, workflow_id);
        Ok(json!({"event_tag": event_tag, "workflow_id": workflow_id}))
    }

    fn unregister_trigger(&self, payload: serde_json::Value) -> OrchestratorResult<serde_json::Value> {
        let event_tag = payload
            .get("event_tag")
            .and_then(|v| v.as_str())
            .ok_or_else(|| OrchestratorError::InvalidParams("event_tag is required".to_string()))?;
        let removed = self.triggers.unregister(event_tag);
        Ok(json!({"removed": removed}))
    }

    async fn resolve_approval(&self, payload: serde_json::Value) -> OrchestratorResult<serde_json::Value> {
        let execution_id = parse_execution_id(&payload)?;
        let step_id = payload
            .get("step_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| OrchestratorError::InvalidParams("step_id is required".to_string()))?;
        let decision = payload
            .get("decision")
            .and_then(|v| v.as_str())
            .ok_or_else(|| OrchestratorError::InvalidParams("decision is required".to_string()))?;
        let actor_id = payload.get("actor_id").and_then(|v| v.as_str()).unwrap_or("unknown");
        let comment = payload.get("comment").and_then(|v| v.as_str());

        let (_, newly_resolved) = self
            .approval
            .resolve(execution_id, step_id, decision, actor_id, comment)
            .await
            .map_err(|e| OrchestratorError::Approval(e.to_string()))?;

        if newly_resolved {
            self.executor.resume_after_approval(execution_id).await;
        }
        Ok(json!({"resumed": newly_resolved}))
    }

    async fn get_pending_approvals(&self) -> OrchestratorResult<serde_json::Value> {
        let pending = self.approval.pending().await?;
        serde_json::to_value(pending).map_err(|e| OrchestratorError::Internal(e.to_string()))
    }

    async fn get_ai_suggestions(&self, payload: serde_json::Value) -> OrchestratorResult<serde_json::Value> {
        let analysis_type = payload
            .get("analysis_type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| OrchestratorError::InvalidParams("analysis_type is required".to_string()))?;
        let workflow_id = payload.get("workflow_id").and_then(|v| v.as_str());
        let execution_id = payload
            .get("execution_id")
            .and_then(|v| v.as_str())
            .map(|s| Uuid::parse_str(s))
            .transpose()
            .map_err(|_| OrchestratorError::InvalidParams("execution_id must be a UUID".to_string()))?;

        let raw = match analysis_type {
            "definition" => {
                let workflow_id = workflow_id
                    .ok_or_else(|| OrchestratorError::InvalidParams("definition analysis requires workflow_id".to_string()))?;
                let def = self.store.load_definition(workflow_id).await?;
                self.advisory.analyze_definition(&def)
            }
            "history" => self.advisory.analyze_history(workflow_id, execution_id).await?,
            "state" => self.advisory.analyze_state().await?,
            other => return Err(OrchestratorError::InvalidParams(format!("unknown analysis_type {other}"))),
        };

        let kept = self.guardrail.evaluate_suggestions(analysis_type, raw).await;
        Ok(json!({"suggestions": kept, "count": kept.len()}))
    }

    async fn generate_draft(&self, payload: serde_json::Value) -> OrchestratorResult<serde_json::Value> {
        let draft_type = payload
            .get("draft_type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| OrchestratorError::InvalidParams("draft_type is required".to_string()))?;
        let constraints = payload.get("constraints").cloned().unwrap_or(json!({}));
        let draft = self.advisory.generate_draft(draft_type, &constraints)?;

        // "analysis_type" for the guardrail's permission gate is the draft
        // category, since draft generation has no separate analysis_type
        // field in its own request shape.
        match self.guardrail.evaluate_draft(&draft.category, draft).await {
            Ok(draft) => Ok(json!({"draft": draft})),
            Err(()) => Err(OrchestratorError::DraftBlocked(
                "guardrail policy blocked this draft".to_string(),
            )),
        }
    }

    async fn get_step_executions(&self, payload: serde_json::Value) -> OrchestratorResult<serde_json::Value> {
        let execution_id = parse_execution_id(&payload)?;
        let steps = self.store.get_step_executions_for(execution_id).await?;
        serde_json::to_value(steps).map_err(|e| OrchestratorError::Internal(e.to_string()))
    }

    async fn get_workflow_definition(&self, payload: serde_json::Value) -> OrchestratorResult<serde_json::Value> {
        let workflow_id = payload
            .get("workflow_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| OrchestratorError::InvalidParams("workflow_id is required".to_string()))?;
        let def = self.store.load_definition(workflow_id).await?;
        serde_json::to_value(def).map_err(|e| OrchestratorError::Internal(e.to_string()))
    }

    async fn get_metrics(&self) -> OrchestratorResult<serde_json::Value> {
        let python_alive = self.dispatcher.worker_is_alive(WorkerRole::Python);
        let network_alive = self.dispatcher.worker_is_alive(WorkerRole::Network);
        Ok(json!({
            "workers": {
                "python": {"alive": python_alive},
                "network": {"alive": network_alive},
            },
        }))
    }

    async fn broadcast_admin(&self, verb: &str) -> OrchestratorResult<serde_json::Value> {
        let results = self.dispatcher.broadcast(verb, json!({})).await;
        let mut by_role = serde_json::Map::new();
        for (role, result) in results {
            let entry = match result {
                Ok(value) => json!({"ok": true, "result": value}),
                Err(e) => json!({"ok": false, "error": e.to_string()}),
            };
            by_role.insert(role.as_str().to_string(), entry);
        }
        Ok(json!({"workers": by_role}))
    }
}

fn parse_execution_id(payload: &serde_json::Value) -> OrchestratorResult<Uuid> {
    let raw = payload
        .get("execution_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| OrchestratorError::InvalidParams("execution_id is required".to_string()))?;
    Uuid::parse_str(raw).map_err(|_| OrchestratorError::InvalidParams("execution_id must be a UUID".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatcherConfig;
    use crate::config::WorkersConfig;
    use crate::guardrail::GuardrailPolicy;

    async fn loop_fixture() -> RequestLoop {
        let store = Arc::new(SqlStore::connect(":memory:").await.unwrap());
        let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig::default()));
        let approval = Arc::new(ApprovalService::new(store.clone()));
        let event_bus = Arc::new(crate::event_bus::EventBus::default());
        let executor = Arc::new(WorkflowExecutor::new(store.clone(), dispatcher.clone(), approval.clone(), event_bus));
        let supervisor = Arc::new(ProcessSupervisor::new(WorkersConfig::default(), &DispatcherConfig::default(), dispatcher.clone()));
        let advisory = Arc::new(AdvisoryService::new(store.clone(), supervisor.clone()));
        let guardrail = Arc::new(GuardrailEnforcer::new(GuardrailPolicy::default(), store.clone()));
        let triggers = Arc::new(TriggerService::new(executor.clone()));
        RequestLoop::new(executor, approval, advisory, guardrail, triggers, dispatcher, supervisor, store)
    }

    #[tokio::test]
    async fn load_then_start_workflow_round_trips_through_dispatch() {
        let rl = loop_fixture().await;
        let load_req = IpcRequest::new(
            "1",
            "LOAD_WORKFLOW",
            json!({
                "workflow_id": "w1", "name": "t", "version": "1.0",
                "steps": [{"step_id": "a", "type": "INTERNAL_OP", "on_failure": "SKIP"}],
            }),
        );
        let response = rl.dispatch_value(serde_json::to_value(load_req).unwrap()).await;
        assert!(response.success);

        let start_req = IpcRequest::new("2", "START_WORKFLOW", json!({"workflow_id": "w1"}));
        let response = rl.dispatch_value(serde_json::to_value(start_req).unwrap()).await;
        assert!(response.success);
        assert!(response.result.unwrap().get("execution_id").is_some());
    }

    #[tokio::test]
    async fn unrecognized_verb_is_invalid_params() {
        let rl = loop_fixture().await;
        let req = IpcRequest::new("1", "NONSENSE_VERB", json!({}));
        let response = rl.dispatch_value(serde_json::to_value(req).unwrap()).await;
        assert!(!response.success);
        assert_eq!(response.error.unwrap().code, "INVALID_PARAMS");
    }

    #[tokio::test]
    async fn malformed_json_line_yields_parse_error_with_unknown_id() {
        let rl = loop_fixture().await;
        // Simulate what `run` does when `next_value` errors: there is no
        // parseable request at all, so id falls back to the sentinel.
        let response = IpcResponse::err(UNPARSEABLE_REQUEST_ID, ErrorCode::ParseError, "boom");
        assert_eq!(response.id, "unknown");
        assert!(!response.success);
        let _ = rl;
    }

    #[tokio::test]
    async fn generate_draft_round_trips_and_matches_hash() {
        let rl = loop_fixture().await;
        let req = IpcRequest::new(
            "1",
            "GENERATE_DRAFT",
            json!({"draft_type": "WORKFLOW_JSON", "constraints": {"name": "X", "step_count": 3}}),
        );
        let response = rl.dispatch_value(serde_json::to_value(req).unwrap()).await;
        assert!(response.success);
        let result = response.result.unwrap();
        let draft = &result["draft"];
        assert_eq!(draft["status"], json!("DRAFT_ONLY"));
        assert_eq!(draft["content"]["steps"].as_array().unwrap().len(), 3);
    }
}
