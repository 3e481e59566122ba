//! marla-predictor — per-node performance predictions for candidate counts.
//!
//! The predictor answers: "with this request rate, how well would node N
//! perform running R replicas?" Scores are normalized to `[0, 1]`, higher
//! is better. A `(count, node)` pair without a usable answer is left out
//! of the returned table, never filled with a default.
//!
//! # Components
//!
//! - **`PerformancePredictor`** — the contract the control loop calls
//! - **`HttpPredictor`** — client for the slowdown predictor service
//! - **`StaticPredictor`** — fixed table, for dry runs and tests

pub mod error;
pub mod http_client;
pub mod predictor;

pub use error::{PredictorError, PredictorResult};
pub use http_client::{HttpPredictor, PredictorSettings};
pub use predictor::{PerformancePredictor, PredictFuture, StaticPredictor};
