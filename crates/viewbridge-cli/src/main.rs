use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::filter::EnvFilter;

mod commands;
mod config;

use commands::{info::InfoCommand, run::RunCommand};

#[derive(Parser)]
#[command(name = "viewbridge", version, about = "Drive a headless browser engine")]
struct Cli {
    /// Path to viewbridge.toml; searched upward from the current directory by default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Navigate a headless browser and print its events
    Run(RunCommand),
    /// Print the runtime version and process list
    Info(InfoCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(command) => command.run(&config).await?,
        Commands::Info(command) => command.run(&config).await?,
    }

    Ok(())
}
