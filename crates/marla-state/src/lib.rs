//! marla-state — domain types and decision log for MARLA.
//!
//! Holds the value types every other crate passes around (`ReplicaPlan`,
//! `RateSample`, `PerformanceTable`) and the append-only `DecisionLog`
//! the control loop writes one record to per completed cycle.
//!
//! # Architecture
//!
//! Decision records are JSON-serialized into a single redb table keyed by
//! a monotonically increasing `u64` sequence number. The log exposes no
//! update or delete operations.
//!
//! The `DecisionLog` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! so the control loop and the status API can share one handle.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::DecisionLog;
pub use types::*;
