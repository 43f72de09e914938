mod args;
mod commands;

use args::{Cli, Commands};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(stove::clienv::log_filter()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { target, no_watch } => commands::run::cmd_run(&target, no_watch).await?,
        Commands::Check { target, json } => commands::check::cmd_check(&target, json)?,
    }

    Ok(())
}
