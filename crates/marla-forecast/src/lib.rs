//! marla-forecast — request-rate history and next-interval forecasting.
//!
//! # Architecture
//!
//! ```text
//! RateSampler (background task)
//!   ├── RateLogSource::read_batch() ← tails the traffic logger's JSONL file
//!   └── RateHistory::extend() → bounded, lock-guarded series
//!
//! ControlLoop (each cycle)
//!   ├── RateHistory::snapshot()
//!   └── Forecaster::forecast() → next-interval rate
//! ```
//!
//! The history is the only state shared between the sampler and the
//! control loop. Every lock acquisition is bounded by a deadline; missing
//! it is reported as [`ForecastError::LockTimeout`].

pub mod error;
pub mod forecaster;
pub mod history;
pub mod sampler;
pub mod source;

pub use error::{ForecastError, ForecastResult};
pub use forecaster::{
    EwmaForecaster, ForecastModel, ForecastSettings, Forecaster, LastValueForecaster,
    LinearTrendForecaster,
};
pub use history::{HistorySettings, RateHistory};
pub use sampler::RateSampler;
pub use source::{RateBatch, RateLogSource};
