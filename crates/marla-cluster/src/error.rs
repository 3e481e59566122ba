//! Orchestrator error types.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrchestratorError {
    /// The node's workload object does not exist.
    #[error("workload for node '{0}' not found")]
    NotFound(String),

    /// Creation raced with, or repeated, an earlier create.
    #[error("workload for node '{0}' already exists")]
    AlreadyExists(String),

    #[error("{operation} on node '{node}' timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        node: String,
        after: Duration,
    },

    #[error("orchestration API error: {0}")]
    Api(String),

    /// The orchestration client could not be constructed.
    #[error("orchestration client error: {0}")]
    Client(String),
}
