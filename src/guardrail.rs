//! Guardrail enforcer: evaluates advisory records against a declarative
//! policy and writes the audit trail. This is the only
//! component allowed to set `requires_human_review`; analyzers never set it
//! themselves.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::model::{Draft, Suggestion};
use crate::persistence::SqlStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Allow,
    Flag,
    Block,
}

impl Decision {
    fn as_str(self) -> &'static str {
        match self {
            Decision::Allow => "ALLOW",
            Decision::Flag => "FLAG",
            Decision::Block => "BLOCK",
        }
    }
}

/// Immutable policy, loaded once at startup from `ai_guardrails.json`.
/// `PartialEq` + `Default` let config-loading tests compare against the
/// built-in policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailPolicy {
    pub min_confidence_threshold: f64,
    pub require_human_review_below_threshold: bool,
    pub max_suggestions_per_request: usize,
    pub blocked_suggestion_types: HashSet<String>,
    /// Empty set is equivalent to "all analysis types allowed".
    pub allowed_analysis_types: HashSet<String>,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self {
            min_confidence_threshold: 0.5,
            require_human_review_below_threshold: true,
            max_suggestions_per_request: 10,
            blocked_suggestion_types: HashSet::new(),
            allowed_analysis_types: HashSet::new(),
        }
    }
}

impl GuardrailPolicy {
    fn analysis_type_permitted(&self, analysis_type: &str) -> bool {
        self.allowed_analysis_types.is_empty() || self.allowed_analysis_types.contains(analysis_type)
    }
}

pub struct GuardrailEnforcer {
    policy: GuardrailPolicy,
    store: Arc<SqlStore>,
}

/// A suggestion annotated with the enforcer's decision, ready to filter into
/// a response payload.
pub struct Judged<T> {
    pub record: T,
    pub decision: Decision,
}

impl GuardrailEnforcer {
    pub fn new(policy: GuardrailPolicy, store: Arc<SqlStore>) -> Self {
        Self { policy, store }
    }

    /// Evaluate a batch of suggestions produced by one analyzer invocation:
    /// analysis-type gate, deny-list, threshold, then truncation with
    /// overflow audited as BLOCK. Every decision is audited; only
    /// ALLOW/FLAG records are returned to the caller, with
    /// `requires_human_review` set on FLAG records.
    pub async fn evaluate_suggestions(
        &self,
        analysis_type: &str,
        mut suggestions: Vec<Suggestion>,
    ) -> Vec<Suggestion> {
        if !self.policy.analysis_type_permitted(analysis_type) {
            for s in &suggestions {
                self.audit_suggestion(s, Decision::Block, "analysis_type not permitted").await;
            }
            return Vec::new();
        }

        let mut decided: Vec<(Suggestion, Decision)> = Vec::with_capacity(suggestions.len());
        for s in suggestions.drain(..) {
            let (decision, reason) = self.decide(&s.category, s.confidence);
            self.audit_suggestion(&s, decision, reason).await;
            decided.push((s, decision));
        }

        let mut kept: Vec<Suggestion> = Vec::new();
        for (mut s, decision) in decided {
            if kept.len() >= self.policy.max_suggestions_per_request {
                if decision != Decision::Block {
                    self.audit_suggestion(&s, Decision::Block, "truncated: max_suggestions_per_request exceeded").await;
                }
                continue;
            }
            match decision {
                Decision::Block => {}
                Decision::Flag => {
                    s.requires_human_review = true;
                    kept.push(s);
                }
                Decision::Allow => {
                    s.requires_human_review = false;
                    kept.push(s);
                }
            }
        }
        kept
    }

    /// Evaluate a single draft. A BLOCK decision means the caller must
    /// receive `DRAFT_BLOCKED` and no content.
    pub async fn evaluate_draft(&self, analysis_type: &str, draft: Draft) -> Result<Draft, ()> {
        if !self.policy.analysis_type_permitted(analysis_type) {
            self.audit_draft(&draft, Decision::Block, "analysis_type not permitted").await;
            return Err(());
        }
        let (decision, reason) = self.decide(&draft.category, draft.confidence);
        self.audit_draft(&draft, decision, reason).await;
        match decision {
            Decision::Block => Err(()),
            Decision::Flag | Decision::Allow => Ok(draft),
        }
    }

    /// The per-record decision logic shared by suggestions and drafts:
    /// deny-list, then threshold. The analysis-type gate is evaluated by
    /// the caller since it applies to the whole batch.
    fn decide(&self, category: &str, confidence: f64) -> (Decision, &'static str) {
        if self.policy.blocked_suggestion_types.contains(category) {
            return (Decision::Block, "category is on the blocked_suggestion_types deny-list");
        }
        if confidence < self.policy.min_confidence_threshold {
            return if self.policy.require_human_review_below_threshold {
                (Decision::Flag, "confidence below threshold, flagged for human review")
            } else {
                (Decision::Block, "confidence below threshold")
            };
        }
        (Decision::Allow, "meets confidence threshold")
    }

    async fn audit_suggestion(&self, s: &Suggestion, decision: Decision, reason: &str) {
        if let Err(e) = self
            .store
            .insert_suggestion_audit(
                s.suggestion_id,
                &s.category,
                decision.as_str(),
                reason,
                s.confidence,
                s.source_execution_id,
            )
            .await
        {
            // A failed audit write is an observability defect, not a
            // correctness defect — the caller still receives the record.
            warn!(suggestion_id = %s.suggestion_id, error = %e, "failed to write suggestion audit row");
        }
        if let Err(e) = self
            .store
            .insert_guardrail_audit(
                s.suggestion_id,
                "suggestion",
                decision.as_str(),
                reason,
                s.confidence,
                s.source_execution_id,
            )
            .await
        {
            warn!(suggestion_id = %s.suggestion_id, error = %e, "failed to write guardrail audit row");
        }
    }

    async fn audit_draft(&self, draft: &Draft, decision: Decision, reason: &str) {
        if let Err(e) = self
            .store
            .insert_draft_audit(draft.draft_id, &draft.category, decision.as_str(), reason, draft.confidence, &draft.content_hash)
            .await
        {
            warn!(draft_id = %draft.draft_id, error = %e, "failed to write draft audit row");
        }
        if let Err(e) = self
            .store
            .insert_guardrail_audit(draft.draft_id, "draft", decision.as_str(), reason, draft.confidence, None)
            .await
        {
            warn!(draft_id = %draft.draft_id, error = %e, "failed to write guardrail audit row");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Limitations;

    fn suggestion(category: &str, confidence: f64) -> Suggestion {
        Suggestion {
            suggestion_id: Uuid::new_v4(),
            category: category.to_string(),
            title: "t".to_string(),
            message: "m".to_string(),
            context: serde_json::json!({}),
            metadata: serde_json::json!({}),
            confidence,
            reasoning_steps: vec![],
            evidence: vec![],
            limitations: Limitations::default(),
            source_execution_id: None,
            requires_human_review: false,
        }
    }

    async fn store() -> Arc<SqlStore> {
        Arc::new(SqlStore::connect(":memory:").await.unwrap())
    }

    #[tokio::test]
    async fn allows_high_confidence_suggestions() {
        let enforcer = GuardrailEnforcer::new(GuardrailPolicy::default(), store().await);
        let kept = enforcer.evaluate_suggestions("definition", vec![suggestion("PERF", 0.9)]).await;
        assert_eq!(kept.len(), 1);
        assert!(!kept[0].requires_human_review);
    }

    #[tokio::test]
    async fn flags_low_confidence_when_review_required() {
        let policy = GuardrailPolicy {
            min_confidence_threshold: 0.7,
            require_human_review_below_threshold: true,
            ..GuardrailPolicy::default()
        };
        let enforcer = GuardrailEnforcer::new(policy, store().await);
        let kept = enforcer.evaluate_suggestions("definition", vec![suggestion("PERF", 0.6)]).await;
        assert_eq!(kept.len(), 1);
        assert!(kept[0].requires_human_review);
    }

    #[tokio::test]
    async fn blocks_low_confidence_when_review_not_required() {
        let policy = GuardrailPolicy {
            min_confidence_threshold: 0.7,
            require_human_review_below_threshold: false,
            ..GuardrailPolicy::default()
        };
        let enforcer = GuardrailEnforcer::new(policy, store().await);
        let kept = enforcer.evaluate_suggestions("definition", vec![suggestion("PERF", 0.6)]).await;
        assert!(kept.is_empty());
    }

    #[tokio::test]
    async fn denylisted_category_is_blocked_regardless_of_confidence() {
        let policy = GuardrailPolicy {
            blocked_suggestion_types: HashSet::from(["DANGEROUS".to_string()]),
            ..GuardrailPolicy::default()
        };
        let enforcer = GuardrailEnforcer::new(policy, store().await);
        let kept = enforcer.evaluate_suggestions("definition", vec![suggestion("DANGEROUS", 0.99)]).await;
        assert!(kept.is_empty());
    }

    #[tokio::test]
    async fn disallowed_analysis_type_blocks_entire_batch() {
        let policy = GuardrailPolicy {
            allowed_analysis_types: HashSet::from(["history".to_string()]),
            ..GuardrailPolicy::default()
        };
        let enforcer = GuardrailEnforcer::new(policy, store().await);
        let kept = enforcer
            .evaluate_suggestions("definition", vec![suggestion("PERF", 0.99)])
            .await;
        assert!(kept.is_empty());
    }

    #[tokio::test]
    async fn truncates_to_max_suggestions_per_request_preserving_order() {
        // confidences 0.9, 0.6, 0.4 with threshold 0.7,
        // require_human_review_below_threshold=true, max=2.
        let policy = GuardrailPolicy {
            min_confidence_threshold: 0.7,
            require_human_review_below_threshold: true,
            max_suggestions_per_request: 2,
            ..GuardrailPolicy::default()
        };
        let enforcer = GuardrailEnforcer::new(policy, store().await);
        let kept = enforcer
            .evaluate_suggestions(
                "history",
                vec![suggestion("PERF", 0.9), suggestion("PERF", 0.6), suggestion("PERF", 0.4)],
            )
            .await;
        assert_eq!(kept.len(), 2);
        assert!(!kept[0].requires_human_review);
        assert!(kept[1].requires_human_review);
    }
}
