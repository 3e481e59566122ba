//! Split scoring for placement decisions.
//!
//! A split assigns a replica count to every node. Its raw score comes from
//! the per-node predictions for those counts:
//! - **`avg`**: replica-weighted mean performance over non-empty nodes
//! - **`max`**: performance of the worse non-empty node
//!
//! Empty nodes carry no weight. An optional penalty is subtracted per empty
//! node, and the optimizer adds a stability bonus on top.

use serde::{Deserialize, Serialize};

use marla_state::{PerformanceTable, ReplicaPlan};

/// How per-node performance is aggregated into one split score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreMetric {
    #[default]
    Avg,
    Max,
}

/// Scoring policy (the `[placement]` config section).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementPolicy {
    pub metric: ScoreMetric,
    /// Bonus per node whose count equals the previously applied plan.
    pub stability_weight: f64,
    /// Subtracted once per node left with zero replicas.
    pub empty_node_penalty: f64,
}

impl Default for PlacementPolicy {
    fn default() -> Self {
        Self {
            metric: ScoreMetric::Avg,
            stability_weight: 0.05,
            empty_node_penalty: 0.0,
        }
    }
}

impl PlacementPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if !self.stability_weight.is_finite() || self.stability_weight < 0.0 {
            return Err(format!(
                "stability_weight must be a non-negative number, got {}",
                self.stability_weight
            ));
        }
        if !self.empty_node_penalty.is_finite() || self.empty_node_penalty < 0.0 {
            return Err(format!(
                "empty_node_penalty must be a non-negative number, got {}",
                self.empty_node_penalty
            ));
        }
        Ok(())
    }
}

/// Raw score of a split given as `(node, replicas)` pairs.
///
/// Returns `None` when a non-empty node has no prediction for its count
/// (the split is infeasible). A split with no replicas at all scores
/// negative infinity.
pub(crate) fn score_split<'a>(
    split: impl IntoIterator<Item = (&'a str, u32)>,
    table: &PerformanceTable,
    policy: &PlacementPolicy,
) -> Option<f64> {
    let mut weighted = 0.0;
    let mut weight = 0u32;
    let mut worst = f64::INFINITY;
    let mut empty = 0u32;

    for (node, replicas) in split {
        if replicas == 0 {
            empty += 1;
            continue;
        }
        let perf = table.get(replicas, node)?;
        weighted += f64::from(replicas) * perf;
        weight += replicas;
        worst = worst.min(perf);
    }

    if weight == 0 {
        return Some(f64::NEG_INFINITY);
    }

    let base = match policy.metric {
        ScoreMetric::Avg => weighted / f64::from(weight),
        ScoreMetric::Max => worst,
    };
    Some(base - policy.empty_node_penalty * f64::from(empty))
}

/// Score of an arbitrary plan under `policy`, without the stability bonus.
pub fn score_plan(plan: &ReplicaPlan, table: &PerformanceTable, policy: &PlacementPolicy) -> Option<f64> {
    score_split(plan.iter(), table, policy)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PerformanceTable {
        [
            (1, "A", 0.9),
            (1, "B", 0.85),
            (2, "A", 0.8),
            (2, "B", 0.7),
        ]
        .into_iter()
        .collect()
    }

    fn plan(a: u32, b: u32) -> ReplicaPlan {
        ReplicaPlan::new().with("A", a).with("B", b)
    }

    #[test]
    fn avg_is_replica_weighted() {
        let policy = PlacementPolicy::default();
        let t: PerformanceTable = [(1, "A", 0.9), (3, "B", 0.5)].into_iter().collect();
        let score = score_plan(&plan(1, 3), &t, &policy).unwrap();
        assert!((score - (0.9 + 3.0 * 0.5) / 4.0).abs() < 1e-9);
    }

    #[test]
    fn avg_excludes_empty_nodes() {
        let policy = PlacementPolicy::default();
        assert_eq!(score_plan(&plan(0, 2), &table(), &policy), Some(0.7));
        assert_eq!(score_plan(&plan(2, 0), &table(), &policy), Some(0.8));
        let even = score_plan(&plan(1, 1), &table(), &policy).unwrap();
        assert!((even - 0.875).abs() < 1e-9);
    }

    #[test]
    fn max_takes_worse_node() {
        let policy = PlacementPolicy {
            metric: ScoreMetric::Max,
            ..Default::default()
        };
        assert_eq!(score_plan(&plan(1, 1), &table(), &policy), Some(0.85));
        assert_eq!(score_plan(&plan(0, 2), &table(), &policy), Some(0.7));
    }

    #[test]
    fn missing_prediction_is_infeasible() {
        let policy = PlacementPolicy::default();
        assert_eq!(score_plan(&plan(3, 0), &table(), &policy), None);
    }

    #[test]
    fn all_empty_scores_negative_infinity() {
        let policy = PlacementPolicy::default();
        assert_eq!(score_plan(&plan(0, 0), &table(), &policy), Some(f64::NEG_INFINITY));
    }

    #[test]
    fn empty_node_penalty_applies_per_empty_node() {
        let policy = PlacementPolicy {
            empty_node_penalty: 0.25,
            ..Default::default()
        };
        let score = score_plan(&plan(0, 2), &table(), &policy).unwrap();
        assert!((score - 0.45).abs() < 1e-9);
    }

    #[test]
    fn policy_validation() {
        assert!(PlacementPolicy::default().validate().is_ok());
        let bad = PlacementPolicy {
            stability_weight: f64::NAN,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
