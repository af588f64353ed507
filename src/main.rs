//! olmtest - end-to-end test harness for Operator Lifecycle Manager
//!
//! Runs YAML test scenarios and one-off polling checks against a cluster
//! through the `oc` CLI.

use clap::Parser;
use commands::Commands;
use olmtest::common::logging;
use olmtest::{cli, commands};

#[derive(Parser)]
#[command(name = "olmtest", about = "OLM end-to-end test harness")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Scenario runs also log to a file; keep the guard alive until exit
    let _guard = match cli.command {
        Commands::Run { .. } => {
            let (log_file, guard) = logging::init_scenario_run();
            if let Some(path) = log_file {
                tracing::debug!("logging to {}", path.display());
            }
            guard
        }
        _ => {
            logging::init_cli();
            None
        }
    };

    if let Err(e) = cli::dispatch(cli.command).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
