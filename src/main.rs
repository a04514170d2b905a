use std::path::PathBuf;

use clap::{Parser, Subcommand};
use fireplan::api::{
    PlanError, plan_from_json, resolve_trials, run_http_server, run_monte_carlo, run_projection,
};
use fireplan::api::export::projection_csv;
use fireplan::core::PlanConfiguration;
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
enum CliError {
    #[error("failed to read plan {path}: {source}")]
    ReadPlan {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error("failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("server error: {0}")]
    Server(std::io::Error),
    #[error("monte carlo worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[derive(Parser, Debug)]
#[command(
    name = "fireplan",
    about = "Monthly retirement projection with gap remediation and Monte Carlo odds"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the JSON API.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Run the deterministic projection for a plan file.
    Project {
        #[arg(long)]
        plan: PathBuf,
        #[arg(long, help = "Emit the yearly projection as CSV instead of JSON")]
        csv: bool,
    },
    /// Estimate the plan's success rate under randomized returns.
    MonteCarlo {
        #[arg(long)]
        plan: PathBuf,
        #[arg(long)]
        trials: Option<u32>,
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn load_plan(path: PathBuf) -> Result<PlanConfiguration, CliError> {
    let json = std::fs::read_to_string(&path).map_err(|source| CliError::ReadPlan {
        path: path.clone(),
        source,
    })?;
    Ok(plan_from_json(&json)?)
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Serve { port } => run_http_server(port).await.map_err(CliError::Server),
        Command::Project { plan, csv } => {
            let plan = load_plan(plan)?;
            let result = run_projection(&plan);
            info!(gap = result.gap, fire_age = ?result.fire_age, "projection finished");
            if csv {
                print!("{}", projection_csv(&result));
            } else {
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
            Ok(())
        }
        Command::MonteCarlo { plan, trials, seed } => {
            let plan = load_plan(plan)?;
            let trials = resolve_trials(trials)?;
            let result =
                tokio::task::spawn_blocking(move || run_monte_carlo(&plan, trials, seed))
                    .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(Cli::parse()).await {
        error!("{e}");
        std::process::exit(1);
    }
}
