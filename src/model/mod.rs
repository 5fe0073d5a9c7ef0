//! Core data types shared by the executor, dispatcher, persistence, and
//! advisory subsystems.

mod advisory;
mod approval;
mod execution;
mod workflow;

pub use advisory::{Draft, DraftStatus, Evidence, Limitations, Suggestion};
pub use approval::ApprovalRequest;
pub use execution::{AttemptRecord, Execution, ExecutionStatus, StepExecution, StepExecutionStatus};
pub use workflow::{
    OnFailure, RetryPolicy, StepDefinition, StepType, TimeoutPolicy, WorkflowDefinition,
};
