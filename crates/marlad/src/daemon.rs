//! `marlad run` — wire the subsystems together and drive them until Ctrl-C.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};

use marla_cluster::KubeOrchestrator;
use marla_controller::{ControlLoop, ControllerState};
use marla_forecast::{RateHistory, RateLogSource, RateSampler};
use marla_predictor::{HttpPredictor, PerformancePredictor, StaticPredictor};
use marla_state::DecisionLog;

pub async fn run(config_path: &Path, static_table: Option<PathBuf>) -> anyhow::Result<()> {
    info!(config = %config_path.display(), "MARLA daemon starting");
    let config = crate::load_config(config_path)?;

    // ── Initialize subsystems ──────────────────────────────────

    // Decision log.
    if let Some(parent) = config.store.path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let log = DecisionLog::open(&config.store.path)?;
    info!(path = %config.store.path.display(), records = log.len()?, "decision log opened");

    // Rate history.
    let history = RateHistory::from_settings(&config.history);

    // Performance predictor.
    let predictor: Arc<dyn PerformancePredictor> = match &static_table {
        Some(path) => {
            info!(path = %path.display(), "using static performance table");
            Arc::new(StaticPredictor::from_file(path)?)
        }
        None => {
            info!(url = %config.predictor.url, "using predictor service");
            Arc::new(HttpPredictor::new(&config.predictor, &config.cluster.nodes)?)
        }
    };

    // Orchestrator. The loop cannot do anything useful without it.
    let orchestrator = KubeOrchestrator::connect(config.cluster.clone())
        .await
        .context("failed to build kubernetes client")?;

    // Control loop.
    let control = ControlLoop::from_config(&config, predictor, Arc::new(orchestrator), log.clone())?;
    let mut state = ControllerState::new(
        history.clone(),
        control.nodes(),
        config.controller.initial_replicas_per_node,
    );
    info!(
        nodes = ?config.cluster.nodes,
        interval_secs = config.controller.interval_secs,
        model = ?config.forecast.model,
        "control loop initialized"
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    // Rate sampler.
    let sampler_handle = match &config.history.rate_log {
        Some(path) => {
            let sampler = RateSampler::new(
                RateLogSource::new(path),
                history,
                Duration::from_secs(config.history.sample_interval_secs),
            );
            let sampler_shutdown = shutdown_rx.clone();
            Some(tokio::spawn(async move {
                sampler.run(sampler_shutdown).await;
            }))
        }
        None => {
            warn!("history.rate_log not set, no rate samples will be collected");
            None
        }
    };

    // Status API.
    let api_handle = if config.api.enabled {
        let bind = config.api.bind;
        let api_log = log.clone();
        let api_shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = marla_api::serve(bind, api_log, api_shutdown).await {
                error!(error = %e, %bind, "status API failed");
            }
        }))
    } else {
        None
    };

    // Control loop.
    let loop_shutdown = shutdown_rx.clone();
    let mut loop_handle = tokio::spawn(async move { control.run(&mut state, loop_shutdown).await });

    // ── Wait for Ctrl-C or a fatal loop exit ───────────────────

    let early_exit = tokio::select! {
        result = &mut loop_handle => Some(result),
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to install CTRL+C handler")?;
            info!("shutdown signal received");
            None
        }
    };
    let _ = shutdown_tx.send(true);

    let loop_result = match early_exit {
        Some(result) => result,
        None => loop_handle.await,
    };

    // Wait for background tasks.
    if let Some(handle) = sampler_handle {
        let _ = handle.await;
    }
    if let Some(handle) = api_handle {
        let _ = handle.await;
    }

    loop_result.context("control loop task panicked")??;
    info!("MARLA daemon stopped");
    Ok(())
}
