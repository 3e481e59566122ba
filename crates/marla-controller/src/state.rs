//! Process-wide controller state.
//!
//! Constructed once at startup and passed by reference into every cycle.
//! Nothing here survives a restart: a new process starts again from the
//! even initial plan.

use chrono::{DateTime, Utc};

use marla_forecast::RateHistory;
use marla_state::{NodeId, ReplicaPlan};

use crate::control_loop::CyclePhase;

#[derive(Debug)]
pub struct ControllerState {
    pub history: RateHistory,
    /// Plan believed to be in effect, per successfully reconciled node.
    pub last_applied_plan: ReplicaPlan,
    /// When a cycle last changed at least one node.
    pub last_action: Option<DateTime<Utc>>,
    /// Cycles started since process start.
    pub cycles: u64,
    /// Phase of the current (or last) cycle.
    pub phase: CyclePhase,
}

impl ControllerState {
    /// State with an even `per_node` split across `nodes`.
    pub fn new(history: RateHistory, nodes: &[NodeId], per_node: u32) -> Self {
        Self {
            history,
            last_applied_plan: ReplicaPlan::even(nodes.iter().cloned(), per_node),
            last_action: None,
            cycles: 0,
            phase: CyclePhase::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn starts_with_even_plan_and_no_action() {
        let history = RateHistory::new(Duration::from_secs(60), 10, Duration::from_millis(10));
        let nodes = vec!["node1".to_string(), "node2".to_string()];
        let state = ControllerState::new(history, &nodes, 1);

        assert_eq!(state.last_applied_plan.to_string(), "{node1: 1, node2: 1}");
        assert!(state.last_action.is_none());
        assert_eq!(state.cycles, 0);
        assert_eq!(state.phase, CyclePhase::Idle);
    }
}
