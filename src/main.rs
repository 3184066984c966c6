//! flowplan CLI: compile workflows to planning problems, plan, debug.

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "flowplan",
    version,
    about = "Compile multi-agent workflows into cost-optimal planning problems and debug reference plans"
)]
struct Cli {
    #[command(subcommand)]
    command: flowplan::cli::Commands,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = flowplan::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
