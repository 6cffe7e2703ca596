//! Error types for agent calls.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for agent calls.
pub type AgentResult<T> = Result<T, AgentError>;

/// Failure of a single agent call.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("cannot connect to agent at {address}: {message}")]
    Connect { address: String, message: String },

    #[error("agent request to {address} failed: {message}")]
    Transport { address: String, message: String },

    #[error("agent at {address} returned {status}: {body}")]
    Status {
        address: String,
        status: u16,
        body: String,
    },

    #[error("agent at {address} did not answer within {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    #[error("cannot build agent request: {0}")]
    Request(String),
}
