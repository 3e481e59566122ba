//! Action gate — decides whether a chosen plan change is worth applying.
//!
//! Capacity increases always pass. Other changes wait out the cooldown
//! since the last action, and a rebalance at the same total must improve
//! the raw score by at least `min_improvement`.

use std::time::Duration;

use chrono::{DateTime, Utc};

use marla_state::ReplicaPlan;

/// Gate decision for one candidate plan.
#[derive(Debug, Clone, PartialEq)]
pub enum GateVerdict {
    Act,
    /// Deferred until the cooldown expires.
    HoldCooldown { remaining: Duration },
    /// Same total, gain below the configured minimum.
    Insignificant { gain: f64 },
}

#[derive(Debug, Clone)]
pub struct ActionGate {
    cooldown: Duration,
    min_improvement: f64,
}

impl ActionGate {
    pub fn new(cooldown: Duration, min_improvement: f64) -> Self {
        Self {
            cooldown,
            min_improvement,
        }
    }

    /// Evaluate moving from `previous` to `candidate`.
    ///
    /// `candidate_score` and `previous_score` are raw scores under this
    /// cycle's predictions; `previous_score` is `None` when the previous
    /// plan cannot be scored.
    pub fn evaluate(
        &self,
        previous: &ReplicaPlan,
        candidate: &ReplicaPlan,
        candidate_score: f64,
        previous_score: Option<f64>,
        last_action: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> GateVerdict {
        if candidate == previous || candidate.total() > previous.total() {
            return GateVerdict::Act;
        }

        if let Some(last) = last_action {
            let elapsed = now.signed_duration_since(last).to_std().unwrap_or(Duration::ZERO);
            if elapsed < self.cooldown {
                return GateVerdict::HoldCooldown {
                    remaining: self.cooldown - elapsed,
                };
            }
        }

        if candidate.total() == previous.total()
            && let Some(previous_score) = previous_score
            && previous_score.is_finite()
        {
            let gain = candidate_score - previous_score;
            if gain < self.min_improvement {
                return GateVerdict::Insignificant { gain };
            }
        }

        GateVerdict::Act
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn plan(a: u32, b: u32) -> ReplicaPlan {
        ReplicaPlan::new().with("node1", a).with("node2", b)
    }

    fn gate() -> ActionGate {
        ActionGate::new(Duration::from_secs(180), 0.05)
    }

    #[test]
    fn first_action_is_never_held() {
        let verdict = gate().evaluate(&plan(1, 1), &plan(2, 0), 0.9, Some(0.8), None, Utc::now());
        assert_eq!(verdict, GateVerdict::Act);
    }

    #[test]
    fn rebalance_within_cooldown_is_held() {
        let now = Utc::now();
        let verdict = gate().evaluate(
            &plan(1, 1),
            &plan(2, 0),
            0.9,
            Some(0.5),
            Some(now - TimeDelta::seconds(60)),
            now,
        );
        assert_eq!(
            verdict,
            GateVerdict::HoldCooldown {
                remaining: Duration::from_secs(120)
            }
        );
    }

    #[test]
    fn scale_down_within_cooldown_is_held() {
        let now = Utc::now();
        let verdict = gate().evaluate(
            &plan(2, 1),
            &plan(1, 1),
            0.9,
            None,
            Some(now - TimeDelta::seconds(10)),
            now,
        );
        assert!(matches!(verdict, GateVerdict::HoldCooldown { .. }));
    }

    #[test]
    fn capacity_increase_bypasses_cooldown() {
        let now = Utc::now();
        let verdict = gate().evaluate(
            &plan(1, 1),
            &plan(2, 1),
            0.7,
            Some(0.9),
            Some(now - TimeDelta::seconds(1)),
            now,
        );
        assert_eq!(verdict, GateVerdict::Act);
    }

    #[test]
    fn small_gain_rebalance_is_insignificant() {
        let now = Utc::now();
        let verdict = gate().evaluate(
            &plan(1, 1),
            &plan(2, 0),
            0.82,
            Some(0.8),
            Some(now - TimeDelta::seconds(600)),
            now,
        );
        assert!(matches!(verdict, GateVerdict::Insignificant { gain } if (gain - 0.02).abs() < 1e-9));
    }

    #[test]
    fn unscorable_previous_plan_does_not_block() {
        let verdict = gate().evaluate(&plan(1, 1), &plan(2, 0), 0.82, None, None, Utc::now());
        assert_eq!(verdict, GateVerdict::Act);
    }
}
