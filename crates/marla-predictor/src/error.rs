//! Predictor error types.

use thiserror::Error;

/// Result type alias for predictor operations.
pub type PredictorResult<T> = Result<T, PredictorError>;

#[derive(Debug, Error)]
pub enum PredictorError {
    /// The predictor service could not be reached or did not answer in time.
    #[error("predictor unavailable: {0}")]
    Unavailable(String),

    #[error("invalid endpoint URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The endpoint answered with a non-success status.
    #[error("endpoint returned HTTP {status}")]
    Status { status: u16 },

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("cannot load static table: {0}")]
    StaticTable(String),
}
