//! Approval Request record for Human-Approval steps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub execution_id: Uuid,
    pub step_id: String,
    pub prompt: String,
    pub allowed_actions: Vec<String>,
    pub requested_at: DateTime<Utc>,

    /// Non-null only after resolution.
    pub decision: Option<String>,
    pub actor_id: Option<String>,
    pub comment: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    pub fn new(
        execution_id: Uuid,
        step_id: impl Into<String>,
        prompt: impl Into<String>,
        allowed_actions: Vec<String>,
    ) -> Self {
        Self {
            execution_id,
            step_id: step_id.into(),
            prompt: prompt.into(),
            allowed_actions,
            requested_at: Utc::now(),
            decision: None,
            actor_id: None,
            comment: None,
            resolved_at: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.decision.is_some()
    }

    /// Whether the decision is a valid member of this request's
    /// `allowed_actions` (e.g. "APPROVE"/"REJECT").
    pub fn is_approved(&self) -> bool {
        self.decision.as_deref() == Some("APPROVE")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_request_is_unresolved() {
        let req = ApprovalRequest::new(Uuid::new_v4(), "h", "approve?", vec!["APPROVE".into(), "REJECT".into()]);
        assert!(!req.is_resolved());
        assert!(!req.is_approved());
    }
}
