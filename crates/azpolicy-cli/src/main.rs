mod cli;
mod commands;
mod output;

use anyhow::Result;
use cli::{Cli, Command};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let run = commands::RunArgs::from_cli(&cli)?;

    match cli.command {
        None => commands::smoke(run, commands::DEFAULT_LOCATION.into()).await,
        Some(Command::Smoke { location }) => commands::smoke(run, location).await,
        Some(Command::Check { suite, matrix, output }) => {
            commands::check(run, suite, matrix, output).await
        }
        Some(Command::Cleanup) => commands::cleanup(run).await,
    }
}
