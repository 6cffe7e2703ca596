//! Error types for orchestrator operations.

use thiserror::Error;
use voidnet_state::StateError;
use voidnet_uplink::AgentError;

/// Result type alias for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Errors surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("manifest rejected: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),

    #[error("manifest fetch failed: {0}")]
    Fetch(String),

    #[error("agent call failed: {0}")]
    Agent(#[from] AgentError),

    #[error("state store error: {0}")]
    State(StateError),

    #[error("orchestrator is shutting down")]
    Draining,

    #[error("dispatch task failed: {0}")]
    Task(String),
}

impl From<StateError> for OrchestratorError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::NotFound(what) => Self::NotFound(what),
            StateError::Conflict(what) => Self::Conflict(what),
            StateError::ValidationFailed(violations) => Self::ValidationFailed(violations),
            other => Self::State(other),
        }
    }
}
