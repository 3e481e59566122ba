//! Placement error types.

use thiserror::Error;

/// Result type alias for placement operations.
pub type PlacementResult<T> = Result<T, PlacementError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlacementError {
    /// The replica lookup table is missing or malformed.
    #[error("lookup table unusable: {0}")]
    Configuration(String),

    /// No split of any candidate total had predictions for all its nodes.
    #[error("no feasible placement for {total} replicas")]
    NoFeasiblePlacement { total: u32 },

    #[error("invalid placement input: {0}")]
    InvalidInput(String),
}
