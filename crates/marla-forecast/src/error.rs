//! Forecasting error types.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for history and forecasting operations.
pub type ForecastResult<T> = Result<T, ForecastError>;

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("not enough rate history to forecast: supplied {supplied}, need {needed}")]
    InsufficientData { supplied: usize, needed: usize },

    #[error("rate history lock not acquired within {0:?}")]
    LockTimeout(Duration),

    #[error("rate source error: {0}")]
    Source(#[from] std::io::Error),

    #[error("invalid forecast settings: {0}")]
    Settings(String),
}
