//! marla-placement — how many replicas, and on which nodes.
//!
//! This crate turns a forecast into a replica plan. It does NOT talk to
//! the cluster or the predictor; it only consumes their outputs.
//!
//! # Components
//!
//! - **`resolver`** — forecast rate → total replica count via a threshold table
//! - **`scorer`** — per-split scoring under a [`PlacementPolicy`]
//! - **`optimizer`** — exhaustive split search with a stability bias

pub mod error;
pub mod optimizer;
pub mod resolver;
pub mod scorer;

pub use error::{PlacementError, PlacementResult};
pub use optimizer::{PlacementDecision, candidate_totals, optimize};
pub use resolver::{LookupEntry, LookupSettings, LookupTable, ReplicaCountResolver, Resolution};
pub use scorer::{PlacementPolicy, ScoreMetric, score_plan};
