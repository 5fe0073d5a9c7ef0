//! Workflow Definition and Step Definition.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;

/// Discriminant for the four step kinds. Deep inheritance in the source
/// system becomes a single tagged enum here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepType {
    #[serde(rename = "PYTHON_TASK")]
    PythonTask,
    #[serde(rename = "EXTERNAL_API_CALL")]
    ExternalApiCall,
    #[serde(rename = "INTERNAL_OP")]
    InternalOp,
    #[serde(rename = "HUMAN_APPROVAL")]
    HumanApproval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnFailure {
    #[serde(rename = "FAIL")]
    Fail,
    #[serde(rename = "RETRY")]
    Retry,
    #[serde(rename = "SKIP")]
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeoutPolicy {
    #[serde(rename = "WAIT")]
    Wait,
    #[serde(rename = "FAIL")]
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub step_id: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    #[serde(default)]
    pub input_mapping: serde_json::Value,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    pub on_failure: OnFailure,
    #[serde(default)]
    pub depends_on: BTreeSet<String>,

    // HUMAN_APPROVAL only.
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub allowed_actions: Option<Vec<String>>,
    #[serde(default)]
    pub timeout_policy: Option<TimeoutPolicy>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub workflow_id: String,
    pub name: String,
    pub version: String,
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub max_parallelism: Option<usize>,
}

impl WorkflowDefinition {
    /// True when any step declares `depends_on`, making this a DAG workflow
    /// rather than a sequential one.
    pub fn is_dag(&self) -> bool {
        self.steps.iter().any(|s| !s.depends_on.is_empty())
    }

    /// Full structural validation: non-empty steps, unique step ids, valid
    /// enum combinations, no self-loops, all dependencies resolvable, and
    /// (for DAG workflows) acyclic. Rejects the whole definition on the
    /// first violation — nothing is partially applied.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.steps.is_empty() {
            return Err(OrchestratorError::InvalidParams(format!(
                "workflow {} has no steps",
                self.workflow_id
            )));
        }

        if let Some(mp) = self.max_parallelism {
            if mp == 0 {
                return Err(OrchestratorError::InvalidParams(
                    "max_parallelism must be a positive integer".to_string(),
                ));
            }
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.step_id.as_str()) {
                return Err(OrchestratorError::InvalidParams(format!(
                    "duplicate step_id {}",
                    step.step_id
                )));
            }
            if step.depends_on.contains(&step.step_id) {
                return Err(OrchestratorError::InvalidParams(format!(
                    "step {} declares a self-dependency",
                    step.step_id
                )));
            }
            if step.retry_policy.max_attempts == 0 {
                return Err(OrchestratorError::InvalidParams(format!(
                    "step {} must allow at least one attempt",
                    step.step_id
                )));
            }
            if step.step_type == StepType::HumanApproval {
                if step.prompt.is_none() {
                    return Err(OrchestratorError::InvalidParams(format!(
                        "HUMAN_APPROVAL step {} is missing prompt",
                        step.step_id
                    )));
                }
                match &step.allowed_actions {
                    Some(actions) if !actions.is_empty() => {}
                    _ => {
                        return Err(OrchestratorError::InvalidParams(format!(
                            "HUMAN_APPROVAL step {} must declare a non-empty allowed_actions",
                            step.step_id
                        )))
                    }
                }
                if step.timeout_policy.is_none() {
                    return Err(OrchestratorError::InvalidParams(format!(
                        "HUMAN_APPROVAL step {} is missing timeout_policy",
                        step.step_id
                    )));
                }
            }
        }

        for step in &self.steps {
            for dep in &step.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(OrchestratorError::InvalidParams(format!(
                        "step {} depends on unknown step {}",
                        step.step_id, dep
                    )));
                }
            }
        }

        if self.is_dag() {
            self.check_acyclic()?;
        }

        Ok(())
    }

    /// Depth-first cycle detection over the `depends_on` edges (dependency
    /// -> dependent is the execution direction; we walk dependency edges,
    /// so a back-edge to an in-progress node is a cycle).
    fn check_acyclic(&self) -> Result<(), OrchestratorError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            InProgress,
            Done,
        }

        let by_id: HashMap<&str, &StepDefinition> =
            self.steps.iter().map(|s| (s.step_id.as_str(), s)).collect();
        let mut marks: HashMap<&str, Mark> = HashMap::new();

        fn visit<'a>(
            id: &'a str,
            by_id: &HashMap<&'a str, &'a StepDefinition>,
            marks: &mut HashMap<&'a str, Mark>,
            workflow_id: &str,
        ) -> Result<(), OrchestratorError> {
            match marks.get(id) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::InProgress) => {
                    return Err(OrchestratorError::InvalidParams(format!(
                        "workflow {workflow_id} has a dependency cycle involving step {id}"
                    )));
                }
                None => {}
            }
            marks.insert(id, Mark::InProgress);
            for dep in &by_id[id].depends_on {
                visit(dep.as_str(), by_id, marks, workflow_id)?;
            }
            marks.insert(id, Mark::Done);
            Ok(())
        }

        for id in by_id.keys() {
            visit(id, &by_id, &mut marks, &self.workflow_id)?;
        }

        Ok(())
    }

    pub fn step(&self, step_id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(id: &str, deps: &[&str]) -> StepDefinition {
        StepDefinition {
            step_id: id.to_string(),
            step_type: StepType::InternalOp,
            input_mapping: json!({}),
            retry_policy: RetryPolicy::default(),
            on_failure: OnFailure::Fail,
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            prompt: None,
            allowed_actions: None,
            timeout_policy: None,
            timeout_ms: None,
        }
    }

    fn wf(steps: Vec<StepDefinition>) -> WorkflowDefinition {
        WorkflowDefinition {
            workflow_id: "w1".to_string(),
            name: "t".to_string(),
            version: "1.0".to_string(),
            steps,
            max_parallelism: None,
        }
    }

    #[test]
    fn sequential_workflow_has_no_depends_on() {
        let def = wf(vec![step("a", &[]), step("b", &[])]);
        assert!(!def.is_dag());
        assert!(def.validate().is_ok());
    }

    #[test]
    fn dag_workflow_detected_from_depends_on() {
        let def = wf(vec![step("a", &[]), step("b", &["a"])]);
        assert!(def.is_dag());
        assert!(def.validate().is_ok());
    }

    #[test]
    fn rejects_empty_steps() {
        let def = wf(vec![]);
        assert!(def.validate().is_err());
    }

    #[test]
    fn rejects_self_loop() {
        let def = wf(vec![step("a", &["a"])]);
        assert!(def.validate().is_err());
    }

    #[test]
    fn rejects_unknown_dependency() {
        let def = wf(vec![step("a", &["ghost"])]);
        assert!(def.validate().is_err());
    }

    #[test]
    fn rejects_cycle() {
        let def = wf(vec![step("a", &["b"]), step("b", &["a"])]);
        assert!(def.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_step_ids() {
        let def = wf(vec![step("a", &[]), step("a", &[])]);
        assert!(def.validate().is_err());
    }

    #[test]
    fn rejects_human_approval_without_prompt() {
        let mut s = step("h", &[]);
        s.step_type = StepType::HumanApproval;
        let def = wf(vec![s]);
        assert!(def.validate().is_err());
    }

    #[test]
    fn accepts_three_node_diamond_dag() {
        let def = wf(vec![step("a", &[]), step("b", &[]), step("c", &["a", "b"])]);
        assert!(def.validate().is_ok());
    }
}
