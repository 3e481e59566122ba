//! Controller error types.
//!
//! Per-cycle problems are recovered inside the cycle and never surface
//! here; these are startup failures and the conditions that stop the loop.

use thiserror::Error;

/// Result type alias for controller operations.
pub type ControllerResult<T> = Result<T, ControllerError>;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("configuration error: {0}")]
    Config(String),

    /// The loop cannot continue safely.
    #[error("fatal controller error: {0}")]
    Fatal(String),

    #[error(transparent)]
    Store(#[from] marla_state::StateError),
}
