//! ControlLoop — one fixed-interval decision cycle, repeated.
//!
//! Cycles never overlap: the loop awaits each cycle before waiting for the
//! next tick, and a cycle that overruns the interval makes the next one
//! start immediately instead of queuing extra ticks.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use marla_cluster::{Orchestrator, Reconciler};
use marla_forecast::{ForecastError, Forecaster};
use marla_placement::{PlacementPolicy, ReplicaCountResolver, candidate_totals, optimize, score_plan};
use marla_predictor::PerformancePredictor;
use marla_state::{CycleOutcome, DecisionLog, DecisionRecord, NodeId, ReplicaPlan};

use crate::config::ControllerConfig;
use crate::error::{ControllerError, ControllerResult};
use crate::gate::{ActionGate, GateVerdict};
use crate::state::ControllerState;

/// Pipeline stage of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Forecasting,
    ResolvingCount,
    QueryingPredictor,
    Optimizing,
    Reconciling,
    LoggingDecision,
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleResult {
    /// The cycle reached `LoggingDecision`; `record` is what was logged.
    Completed(DecisionRecord),
    /// The cycle stopped early and nothing was changed or logged.
    Abandoned { phase: CyclePhase, reason: String },
}

pub struct ControlLoop {
    nodes: Vec<NodeId>,
    forecaster: Box<dyn Forecaster>,
    resolver: ReplicaCountResolver,
    predictor: Arc<dyn PerformancePredictor>,
    reconciler: Reconciler,
    policy: PlacementPolicy,
    gate: ActionGate,
    log: DecisionLog,
    interval: Duration,
    shutdown_grace: Duration,
}

impl ControlLoop {
    /// Assemble a loop from configuration and the externally built
    /// predictor, orchestrator and decision log.
    pub fn from_config(
        config: &ControllerConfig,
        predictor: Arc<dyn PerformancePredictor>,
        orchestrator: Arc<dyn Orchestrator>,
        log: DecisionLog,
    ) -> ControllerResult<Self> {
        config.validate()?;
        let forecaster = config
            .forecast
            .build()
            .map_err(|e| ControllerError::Config(e.to_string()))?;
        let reconciler = Reconciler::new(orchestrator)
            .with_settle_delay(config.controller.settle_delay())
            .with_call_timeout(config.controller.call_timeout())
            .with_zero_policy(config.controller.zero_policy);

        Ok(Self {
            nodes: config.cluster.nodes.clone(),
            forecaster,
            resolver: ReplicaCountResolver::from_settings(&config.lookup),
            predictor,
            reconciler,
            policy: config.placement.clone(),
            gate: ActionGate::new(config.controller.cooldown(), config.controller.min_improvement),
            log,
            interval: config.controller.interval(),
            shutdown_grace: config.controller.shutdown_grace(),
        })
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    fn enter(&self, state: &mut ControllerState, phase: CyclePhase) {
        state.phase = phase;
        debug!(cycle = state.cycles, ?phase, "cycle phase");
    }

    fn abandon(&self, state: &mut ControllerState, phase: CyclePhase, reason: String) -> CycleResult {
        warn!(
            cycle = state.cycles,
            ?phase,
            reason = %reason,
            plan = %state.last_applied_plan,
            "cycle skipped, previous plan kept"
        );
        state.phase = CyclePhase::Idle;
        CycleResult::Abandoned { phase, reason }
    }

    /// Run one cycle at the current wall-clock time.
    pub async fn run_cycle(&self, state: &mut ControllerState) -> ControllerResult<CycleResult> {
        self.run_cycle_at(state, Utc::now()).await
    }

    /// Run one cycle, using `now` for cooldown checks and the record
    /// timestamp.
    pub async fn run_cycle_at(
        &self,
        state: &mut ControllerState,
        now: DateTime<Utc>,
    ) -> ControllerResult<CycleResult> {
        state.cycles += 1;
        let previous = state.last_applied_plan.clone();

        // ── Forecasting ──
        self.enter(state, CyclePhase::Forecasting);
        let history = match state.history.snapshot().await {
            Ok(history) => history,
            Err(e @ ForecastError::LockTimeout(_)) => {
                error!(error = %e, "rate history lock deadline exceeded");
                state.phase = CyclePhase::Idle;
                return Err(ControllerError::Fatal(e.to_string()));
            }
            Err(e) => return Ok(self.abandon(state, CyclePhase::Forecasting, e.to_string())),
        };
        let forecast = match self.forecaster.forecast(&history) {
            Ok(rate) => rate,
            Err(e) => return Ok(self.abandon(state, CyclePhase::Forecasting, e.to_string())),
        };
        debug!(forecast, samples = history.len(), "rate forecast");

        // ── ResolvingCount ──
        self.enter(state, CyclePhase::ResolvingCount);
        let resolution = self.resolver.resolve(forecast).await;
        let total = resolution.replicas;
        let mut notes = Vec::new();
        if let Some(e) = &resolution.error {
            notes.push(e.to_string());
        }

        // ── QueryingPredictor ──
        self.enter(state, CyclePhase::QueryingPredictor);
        let counts: BTreeSet<u32> = (1..=total).collect();
        let table = match self.predictor.predict(forecast, &counts).await {
            Ok(table) => table,
            Err(e) => return Ok(self.abandon(state, CyclePhase::QueryingPredictor, e.to_string())),
        };
        debug!(entries = table.len(), "performance table received");

        // ── Optimizing ──
        self.enter(state, CyclePhase::Optimizing);
        let decision = match optimize(total, &self.nodes, &table, &previous, &self.policy) {
            Ok(decision) => decision,
            Err(e) => {
                warn!(
                    forecast,
                    total,
                    totals = ?candidate_totals(total),
                    entries = table.len(),
                    error = %e,
                    plan = %previous,
                    "cycle skipped, no feasible placement, previous plan kept"
                );
                notes.push(format!("cycle skipped: {e}"));
                return self.finish(
                    state,
                    DecisionRecord {
                        seq: 0,
                        timestamp: now,
                        forecast_rate: forecast,
                        resolved_replicas: total,
                        chosen_plan: previous.clone(),
                        previous_plan: previous,
                        outcome: CycleOutcome::NoFeasiblePlacement,
                        node_outcomes: Vec::new(),
                        score: None,
                        note: join_notes(notes),
                    },
                );
            }
        };

        let verdict = self.gate.evaluate(
            &previous,
            &decision.plan,
            decision.raw_score,
            score_plan(&previous, &table, &self.policy),
            state.last_action,
            now,
        );
        let held = match verdict {
            GateVerdict::Act => None,
            GateVerdict::HoldCooldown { remaining } => {
                info!(plan = %decision.plan, remaining_secs = remaining.as_secs(), "plan change held by cooldown");
                notes.push(format!("cooldown: {}s remaining", remaining.as_secs()));
                Some(CycleOutcome::HeldByCooldown)
            }
            GateVerdict::Insignificant { gain } => {
                info!(plan = %decision.plan, gain, "plan change below minimum improvement");
                notes.push(format!("gain {gain:.4} below minimum"));
                Some(CycleOutcome::NoChange)
            }
        };
        if let Some(outcome) = held {
            return self.finish(
                state,
                DecisionRecord {
                    seq: 0,
                    timestamp: now,
                    forecast_rate: forecast,
                    resolved_replicas: total,
                    chosen_plan: decision.plan,
                    previous_plan: previous,
                    outcome,
                    node_outcomes: Vec::new(),
                    score: Some(decision.score),
                    note: join_notes(notes),
                },
            );
        }

        // ── Reconciling ──
        self.enter(state, CyclePhase::Reconciling);
        debug!(
            plan = %decision.plan,
            kept_nodes = previous.matches(&decision.plan),
            "reconciling toward chosen plan"
        );
        let live = self.reconciler.observe(&self.nodes).await;
        let unknown: Vec<&str> = live.unknown_nodes().collect();
        if !unknown.is_empty() {
            debug!(nodes = ?unknown, "nodes with unreadable live count");
        }
        let observed = live.known_plan();
        if previous.matches_on(&observed, observed.nodes()) < observed.nodes().count() {
            info!(expected = %previous, observed = %observed, "live cluster drifted from last applied plan");
        }
        let report = self.reconciler.reconcile(&decision.plan, &live).await;

        state.last_applied_plan = report.applied_plan(&previous);
        if report.changed() {
            state.last_action = Some(now);
        }

        let outcome = if report.is_partial() {
            for failure in report.failures() {
                notes.push(format!(
                    "{}: {}",
                    failure.node,
                    failure.error.as_deref().unwrap_or("failed")
                ));
            }
            warn!(
                forecast,
                total,
                plan = %decision.plan,
                applied = %state.last_applied_plan,
                failed = report.failures().count(),
                "cycle partially applied"
            );
            CycleOutcome::PartiallyApplied
        } else if report.changed() {
            CycleOutcome::Applied
        } else {
            CycleOutcome::NoChange
        };

        self.finish(
            state,
            DecisionRecord {
                seq: 0,
                timestamp: now,
                forecast_rate: forecast,
                resolved_replicas: total,
                chosen_plan: decision.plan,
                previous_plan: previous,
                outcome,
                node_outcomes: report.outcomes,
                score: Some(decision.score),
                note: join_notes(notes),
            },
        )
    }

    /// LoggingDecision: append the record and return to idle.
    fn finish(&self, state: &mut ControllerState, mut record: DecisionRecord) -> ControllerResult<CycleResult> {
        self.enter(state, CyclePhase::LoggingDecision);
        match self.log.append(&record) {
            Ok(seq) => record.seq = seq,
            Err(e) => error!(error = %e, outcome = ?record.outcome, "failed to append decision record"),
        }
        info!(
            cycle = state.cycles,
            seq = record.seq,
            forecast = record.forecast_rate,
            replicas = record.resolved_replicas,
            plan = %record.chosen_plan,
            outcome = ?record.outcome,
            "cycle complete"
        );
        state.phase = CyclePhase::Idle;
        Ok(CycleResult::Completed(record))
    }

    /// Run cycles on the configured interval until shutdown signal.
    ///
    /// A cycle in flight when shutdown arrives gets `shutdown_grace` to
    /// finish. Returns an error only for fatal conditions.
    pub async fn run(
        &self,
        state: &mut ControllerState,
        mut shutdown: watch::Receiver<bool>,
    ) -> ControllerResult<()> {
        info!(
            interval_secs = self.interval.as_secs(),
            min_samples = self.forecaster.min_samples(),
            nodes = ?self.nodes,
            plan = %state.last_applied_plan,
            "control loop started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    info!("control loop shutting down");
                    break;
                }
            }

            let mut stopping = false;
            let result = {
                let cycle = self.run_cycle(state);
                tokio::pin!(cycle);
                tokio::select! {
                    result = &mut cycle => Some(result),
                    _ = shutdown.changed() => {
                        stopping = true;
                        info!(grace_secs = self.shutdown_grace.as_secs(), "shutdown requested, finishing in-flight cycle");
                        tokio::time::timeout(self.shutdown_grace, &mut cycle).await.ok()
                    }
                }
            };

            match result {
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(error = %e, "control loop stopping on fatal error");
                    return Err(e);
                }
                None => {
                    warn!(
                        phase = ?state.phase,
                        plan = %state.last_applied_plan,
                        "in-flight cycle abandoned at shutdown"
                    );
                    state.phase = CyclePhase::Idle;
                }
            }

            if stopping {
                info!("control loop shutting down");
                break;
            }
        }
        Ok(())
    }
}

fn join_notes(notes: Vec<String>) -> Option<String> {
    if notes.is_empty() { None } else { Some(notes.join("; ")) }
}
