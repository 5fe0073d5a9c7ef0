//! Approval service: request/resolve/query of Human Approval decisions.
//! Resolution is idempotent and always persisted before the executor is
//! allowed to observe it.

use std::sync::Arc;

use dashmap::DashSet;
use tracing::info;
use uuid::Uuid;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::model::ApprovalRequest;
use crate::persistence::SqlStore;

pub struct ApprovalService {
    store: Arc<SqlStore>,
    /// Tracks (execution_id, step_id) pairs currently paused so a resumer
    /// can tell "waiting" from "never requested" without a store round trip.
    waiting: DashSet<(Uuid, String)>,
}

impl ApprovalService {
    pub fn new(store: Arc<SqlStore>) -> Self {
        Self {
            store,
            waiting: DashSet::new(),
        }
    }

    /// Look up an existing resolution for (execution_id, step_id), used on
    /// resume so a previously-resolved HUMAN_APPROVAL step is not
    /// re-requested after a restart.
    pub async fn existing_decision(&self, execution_id: Uuid, step_id: &str) -> Option<ApprovalRequest> {
        self.store.get_approval(execution_id, step_id).await.ok()
    }

    /// Create a new, unresolved approval request and mark the pair waiting.
    pub async fn request(
        &self,
        execution_id: Uuid,
        step_id: &str,
        prompt: &str,
        allowed_actions: Vec<String>,
    ) -> OrchestratorResult<ApprovalRequest> {
        let approval = ApprovalRequest::new(execution_id, step_id, prompt, allowed_actions);
        self.store.create_approval(&approval).await?;
        self.waiting.insert((execution_id, step_id.to_string()));
        info!(execution_id = %execution_id, step_id, "workflow paused for human approval");
        Ok(approval)
    }

    /// Resolve a pending approval. Idempotent: a second call for an
    /// already-resolved pair returns the original decision without error or
    /// mutation.
    pub async fn resolve(
        &self,
        execution_id: Uuid,
        step_id: &str,
        decision: &str,
        actor_id: &str,
        comment: Option<&str>,
    ) -> OrchestratorResult<(ApprovalRequest, bool)> {
        let before = self.store.get_approval(execution_id, step_id).await?;
        let already_resolved = before.is_resolved();
        let resolved = self
            .store
            .resolve_approval(execution_id, step_id, decision, actor_id, comment)
            .await?;
        if !already_resolved {
            self.waiting.remove(&(execution_id, step_id.to_string()));
        }
        Ok((resolved, !already_resolved))
    }

    /// Resolve as if the system actor had submitted REJECT, used when
    /// `timeout_policy=FAIL` and the deadline elapses without an external
    /// decision. The returned bool is true only if this call is the one
    /// that resolved the approval (mirrors `resolve`'s idempotency signal),
    /// so the caller knows whether it, and not a race with an external
    /// `RESOLVE_APPROVAL`, is responsible for reviving the execution.
    pub async fn resolve_as_timed_out(&self, execution_id: Uuid, step_id: &str) -> OrchestratorResult<(ApprovalRequest, bool)> {
        self.resolve(execution_id, step_id, "REJECT", "system:timeout", Some("timeout_policy=FAIL deadline elapsed"))
            .await
    }

    pub async fn pending(&self) -> OrchestratorResult<Vec<ApprovalRequest>> {
        self.store.get_pending_approvals().await
    }

    pub async fn get(&self, execution_id: Uuid, step_id: &str) -> OrchestratorResult<ApprovalRequest> {
        self.store
            .get_approval(execution_id, step_id)
            .await
            .map_err(|_| OrchestratorError::NotFound(format!("approval for {step_id} of execution {execution_id}")))
    }

    pub fn is_waiting(&self, execution_id: Uuid, step_id: &str) -> bool {
        self.waiting.contains(&(execution_id, step_id.to_string()))
    }
}
