//! chainplan CLI: dependency-ordered, resumable contract deployment.

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = chainplan::cli::Cli::parse();

    let default_filter = match cli.verbose {
        0 => "chainplan=info,warn",
        1 => "chainplan=debug,info",
        _ => "chainplan=trace,debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = chainplan::cli::dispatch(cli.command).await {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
