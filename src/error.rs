//! Crate-wide error type.
//!
//! Every fallible path in the core funnels into [`OrchestratorError`]. Each
//! variant carries the IPC error code it must surface as — these codes are
//! part of the wire contract and must not be renamed — so the IPC loop
//! never needs a second mapping table between internal errors and wire codes.

use thiserror::Error;

/// Error codes from the parent/worker wire protocol. Renaming any of these
/// is a breaking protocol change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidParams,
    NotFound,
    WorkflowError,
    ApprovalError,
    AiError,
    DraftBlocked,
    WorkerTimeout,
    WorkerDead,
    SecurityViolation,
    ParseError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidParams => "INVALID_PARAMS",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::WorkflowError => "WORKFLOW_ERROR",
            ErrorCode::ApprovalError => "APPROVAL_ERROR",
            ErrorCode::AiError => "AI_ERROR",
            ErrorCode::DraftBlocked => "DRAFT_BLOCKED",
            ErrorCode::WorkerTimeout => "WORKER_TIMEOUT",
            ErrorCode::WorkerDead => "WORKER_DEAD",
            ErrorCode::SecurityViolation => "SECURITY_VIOLATION",
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("workflow error: {0}")]
    Workflow(String),

    #[error("approval error: {0}")]
    Approval(String),

    #[error("advisory error: {0}")]
    Advisory(String),

    #[error("draft blocked: {0}")]
    DraftBlocked(String),

    #[error("worker timed out waiting for response to request {request_id}")]
    WorkerTimeout { request_id: String },

    #[error("worker process for role {role} is dead")]
    WorkerDead { role: String },

    #[error("guardrail security violation: {0}")]
    SecurityViolation(String),

    #[error("failed to parse message: {0}")]
    Parse(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    pub fn code(&self) -> ErrorCode {
        match self {
            OrchestratorError::InvalidParams(_) => ErrorCode::InvalidParams,
            OrchestratorError::NotFound(_) => ErrorCode::NotFound,
            OrchestratorError::Workflow(_) => ErrorCode::WorkflowError,
            OrchestratorError::Approval(_) => ErrorCode::ApprovalError,
            OrchestratorError::Advisory(_) => ErrorCode::AiError,
            OrchestratorError::DraftBlocked(_) => ErrorCode::DraftBlocked,
            OrchestratorError::WorkerTimeout { .. } => ErrorCode::WorkerTimeout,
            OrchestratorError::WorkerDead { .. } => ErrorCode::WorkerDead,
            OrchestratorError::SecurityViolation(_) => ErrorCode::SecurityViolation,
            OrchestratorError::Parse(_) => ErrorCode::ParseError,
            OrchestratorError::Internal(_) | OrchestratorError::Database(_) | OrchestratorError::Io(_) => {
                ErrorCode::InternalError
            }
        }
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable_strings() {
        assert_eq!(ErrorCode::InvalidParams.as_str(), "INVALID_PARAMS");
        assert_eq!(ErrorCode::WorkerDead.as_str(), "WORKER_DEAD");
        assert_eq!(ErrorCode::DraftBlocked.as_str(), "DRAFT_BLOCKED");
    }

    #[test]
    fn variants_map_to_expected_codes() {
        assert_eq!(OrchestratorError::NotFound("x".into()).code(), ErrorCode::NotFound);
        assert_eq!(
            OrchestratorError::WorkerTimeout { request_id: "r1".into() }.code(),
            ErrorCode::WorkerTimeout
        );
        assert_eq!(
            OrchestratorError::Advisory("bad rule".into()).code(),
            ErrorCode::AiError
        );
    }
}
