//! Execution error types

use skyward_link::LinkError;
use thiserror::Error;

/// Errors raised by the execution orchestrator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("A plan is already executing")]
    AlreadyExecuting,

    #[error("Execution aborted")]
    AbortRequested,

    #[error("Target {target} failed: {reason}")]
    TargetExecutionFailed { target: String, reason: String },

    #[error("Telescope error: {0}")]
    Telescope(#[from] LinkError),

    #[error("Plan rejected: {0}")]
    InvalidPlan(String),

    #[error("Execution task ended unexpectedly: {0}")]
    TaskFailed(String),
}

pub type ExecutionResult<T> = Result<T, ExecutionError>;
