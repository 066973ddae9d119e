//! Orchestrator error types.

use hostgrid_core::ValidationError;
use hostgrid_runtime::RuntimeError;
use hostgrid_state::StateError;
use thiserror::Error;

/// Errors returned by orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Start/Stop on a project that was never deployed.
    #[error("project {0} has no deployment")]
    NoDeployment(String),

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("state store error: {0}")]
    State(StateError),

    /// A detached operation task was cancelled by runtime shutdown.
    #[error("operation aborted: {0}")]
    Aborted(String),
}

impl From<StateError> for OrchestratorError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Conflict(msg) => Self::Conflict(msg),
            StateError::NotFound(msg) => Self::NotFound(msg),
            other => Self::State(other),
        }
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
