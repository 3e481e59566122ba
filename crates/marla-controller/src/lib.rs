//! marla-controller — the adaptive replica-placement control loop.
//!
//! Every interval the loop runs one cycle through a fixed pipeline:
//!
//! ```text
//! Idle → Forecasting → ResolvingCount → QueryingPredictor
//!      → Optimizing → Reconciling → LoggingDecision → Idle
//! ```
//!
//! Forecasting and predictor failures abandon the cycle. An infeasible
//! placement keeps the previous plan. Reconcile failures are partial: the
//! applied plan advances only for nodes that succeeded. Every cycle that
//! reaches `LoggingDecision` appends one record to the decision log.

pub mod config;
pub mod control_loop;
pub mod error;
pub mod gate;
pub mod state;

pub use config::{ApiSettings, ControllerConfig, LoopSettings, StoreSettings};
pub use control_loop::{ControlLoop, CyclePhase, CycleResult};
pub use error::{ControllerError, ControllerResult};
pub use gate::{ActionGate, GateVerdict};
pub use state::ControllerState;
