//! orch Job Orchestrator Server
//!
//! Main entry point: loads configuration, sets up logging and runs the
//! composition root until a shutdown signal arrives.

mod startup;

use clap::Parser;
use orch_shared::ConfigLoader;
use std::path::PathBuf;

/// CLI arguments for orch-server
#[derive(clap::Parser, Debug)]
#[command(name = "orch-server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Event-driven batch job orchestrator", long_about = None)]
struct Args {
    /// `.env` file loaded before reading the environment
    #[arg(short, long)]
    env_file: Option<PathBuf>,

    /// Enable debug mode
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = ConfigLoader::new(args.env_file).load_server_config()?;

    setup_logging(args.debug, &config.logging.level)?;

    startup::run(config).await
}

/// Setup logging from the configured filter; `--debug` overrides it.
fn setup_logging(debug: bool, level: &str) -> anyhow::Result<()> {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    let level = if debug { "debug" } else { level };
    let env_filter = EnvFilter::try_new(level)
        .map_err(|e| anyhow::anyhow!("Invalid log filter '{}': {}", level, e))?;

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {}", e))
}
