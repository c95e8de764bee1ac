//! Error types for the Skyward bridge
//!
//! Wraps the planner, link and sequencer errors so callers of
//! [`ObservatoryService`](crate::ObservatoryService) handle a single type.

use skyward_link::LinkError;
use skyward_planner::PlannerError;
use skyward_sequencer::ExecutionError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    // =========================================================================
    // Component Errors
    // =========================================================================

    #[error(transparent)]
    Planner(#[from] PlannerError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    // =========================================================================
    // Bridge Errors
    // =========================================================================

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Telescope not connected")]
    NotConnected,

    /// Manual telescope commands are refused while a plan is executing
    #[error("Cannot {0} while a plan is executing")]
    ExecutionActive(String),
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Config(err.to_string())
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
