//! marlad — the MARLA daemon.
//!
//! Single binary that assembles the controller:
//! - Rate sampler (traffic logger JSONL → rate history)
//! - Performance predictor client
//! - Kubernetes orchestrator + reconciler
//! - Control loop
//! - Decision log (redb) and status API
//!
//! # Usage
//!
//! ```text
//! marlad run --config /etc/marla/marla.toml
//! marlad check-config --config marla.toml
//! marlad decisions --limit 5
//! ```

mod daemon;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use marla_controller::ControllerConfig;
use marla_state::DecisionLog;

const DEFAULT_FILTER: &str = "info,marlad=debug,marla=debug";

#[derive(Parser)]
#[command(name = "marlad", about = "MARLA adaptive replica placement daemon")]
struct Cli {
    /// Configuration file.
    #[arg(long, global = true, env = "MARLA_CONFIG", default_value = "marla.toml")]
    config: PathBuf,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control loop until Ctrl-C.
    Run {
        /// Use a fixed performance table (JSON) instead of the predictor service.
        #[arg(long)]
        static_table: Option<PathBuf>,
    },
    /// Parse and validate the configuration, then exit.
    CheckConfig,
    /// Print the most recent decision records as JSON.
    ///
    /// Reads the store file directly, so it only works while no daemon has
    /// it open. Query `GET /api/v1/decisions` on a running daemon instead.
    Decisions {
        #[arg(long, default_value = "10")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }

    match cli.command {
        Command::Run { static_table } => daemon::run(&cli.config, static_table).await,
        Command::CheckConfig => check_config(&cli.config),
        Command::Decisions { limit } => print_decisions(&cli.config, limit),
    }
}

fn load_config(path: &std::path::Path) -> anyhow::Result<ControllerConfig> {
    let config = ControllerConfig::from_file(path)?;
    config.validate()?;
    Ok(config)
}

fn check_config(path: &std::path::Path) -> anyhow::Result<()> {
    let config = load_config(path)?;
    println!(
        "{}: ok ({} nodes, interval {}s, forecast {:?}, store {})",
        path.display(),
        config.cluster.nodes.len(),
        config.controller.interval_secs,
        config.forecast.model,
        config.store.path.display()
    );
    Ok(())
}

fn print_decisions(path: &std::path::Path, limit: usize) -> anyhow::Result<()> {
    let config = load_config(path)?;
    let log = DecisionLog::open(&config.store.path).with_context(|| {
        format!(
            "cannot open {}; if marlad is running it holds the file, query GET /api/v1/decisions on {} instead",
            config.store.path.display(),
            config.api.bind
        )
    })?;
    for record in log.list_recent(limit)? {
        println!("{}", serde_json::to_string(&record)?);
    }
    Ok(())
}
