use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use fleetwatch::{app, config, telemetry};

#[derive(Parser)]
#[command(name = "fleetwatch")]
#[command(about = "Polls a ledger fleet and reports forks and state divergence")]
#[command(version)]
struct Cli {
    /// TOML config with the [monitor] settings and the [[nodes]] roster
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Time between rounds (e.g. "6s")
    #[arg(long)]
    interval: Option<humantime::Duration>,

    /// Per-node request timeout (e.g. "3s", "500ms")
    #[arg(long)]
    timeout: Option<humantime::Duration>,

    /// Serve the latest round over HTTP on this address
    #[arg(long)]
    status_addr: Option<String>,

    /// Run a single round, print it as JSON and exit non-zero unless consistent
    #[arg(long)]
    once: bool,
}

fn load(cli: &Cli) -> Result<config::Config, config::Error> {
    let mut config = match &cli.config {
        Some(path) => config::Config::load(path)?,
        None => config::Config::default()
    };
    if let Some(interval) = &cli.interval {
        config.monitor.interval_ms = interval.as_millis() as u64;
    }
    if let Some(timeout) = &cli.timeout {
        config.monitor.timeout_ms = timeout.as_millis() as u64;
    }
    if cli.status_addr.is_some() {
        config.monitor.status_addr = cli.status_addr.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = telemetry::init() {
        eprintln!("Can't set up logging: {}", e);
    }
    let config = match load(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let mut monitor = app::Monitor::new(config);
    if cli.once {
        let record = monitor.cycle().await;
        match serde_json::to_string_pretty(&record) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Can't serialize round: {}", e)
        }
        return if record.is_ok() { ExitCode::SUCCESS } else { ExitCode::FAILURE };
    }
    match monitor.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
