//! Placement optimizer — exhaustive search over per-node splits.
//!
//! For each candidate total (the resolved count, then one fewer) every
//! composition of that total across the configured nodes is scored. Node
//! order is the configured cluster order; compositions are enumerated with
//! the first node's count ascending, and ties keep the first split found.
//! The search space is tiny (a handful of nodes, single-digit totals).

use tracing::{debug, trace};

use marla_state::{NodeId, PerformanceTable, ReplicaPlan};

use crate::error::{PlacementError, PlacementResult};
use crate::scorer::{PlacementPolicy, score_split};

/// The selected split and how it was found.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementDecision {
    pub plan: ReplicaPlan,
    /// Final score including the stability bonus.
    pub score: f64,
    /// Score without the stability bonus.
    pub raw_score: f64,
    /// Splits enumerated across all candidate totals.
    pub evaluated: usize,
    /// Splits that had a prediction for every non-empty node.
    pub feasible: usize,
}

/// Totals searched for a resolved count: itself, plus one fewer when that
/// still leaves at least one replica.
pub fn candidate_totals(total: u32) -> Vec<u32> {
    if total > 1 {
        vec![total, total - 1]
    } else {
        vec![total]
    }
}

/// Choose the best split of `total` (or `total - 1`) replicas over `nodes`.
pub fn optimize(
    total: u32,
    nodes: &[NodeId],
    table: &PerformanceTable,
    previous: &ReplicaPlan,
    policy: &PlacementPolicy,
) -> PlacementResult<PlacementDecision> {
    if total == 0 {
        return Err(PlacementError::InvalidInput("total replicas must be positive".into()));
    }
    if nodes.is_empty() {
        return Err(PlacementError::InvalidInput("no nodes to place on".into()));
    }

    let mut best: Option<(ReplicaPlan, f64, f64)> = None;
    let mut evaluated = 0;
    let mut feasible = 0;

    for candidate in candidate_totals(total) {
        for split in compositions(candidate, nodes.len()) {
            evaluated += 1;
            let pairs = nodes.iter().map(String::as_str).zip(split.iter().copied());
            let Some(raw) = score_split(pairs, table, policy) else {
                trace!(?split, "split infeasible");
                continue;
            };
            feasible += 1;

            let plan: ReplicaPlan = nodes.iter().cloned().zip(split.iter().copied()).collect();
            let matches = previous.matches_on(&plan, nodes.iter().map(String::as_str));
            let score = raw + policy.stability_weight * matches as f64;
            trace!(?split, raw, matches, score, "split scored");

            let better = match &best {
                None => true,
                Some((_, best_score, _)) => score > *best_score,
            };
            if better {
                best = Some((plan, score, raw));
            }
        }
    }

    let Some((plan, score, raw_score)) = best else {
        debug!(total, evaluated, "no feasible placement");
        return Err(PlacementError::NoFeasiblePlacement { total });
    };

    debug!(total, %plan, score, raw_score, evaluated, feasible, "placement chosen");
    Ok(PlacementDecision {
        plan,
        score,
        raw_score,
        evaluated,
        feasible,
    })
}

/// All ways to write `total` as `parts` non-negative integers, in
/// lexicographic order.
fn compositions(total: u32, parts: usize) -> Vec<Vec<u32>> {
    let mut out = Vec::new();
    let mut current = Vec::with_capacity(parts);
    fill(total, parts, &mut current, &mut out);
    out
}

fn fill(remaining: u32, parts: usize, current: &mut Vec<u32>, out: &mut Vec<Vec<u32>>) {
    if parts == 1 {
        current.push(remaining);
        out.push(current.clone());
        current.pop();
        return;
    }
    for first in 0..=remaining {
        current.push(first);
        fill(remaining - first, parts - 1, current, out);
        current.pop();
    }
}
