//! Freobus command-line driver
//!
//! Prints the effective configuration and runs an in-process simulation of
//! browser contexts coordinating one session over a shared channel.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod app;
mod commands;

use commands::{config, simulate};

#[derive(Parser)]
#[command(name = "freobus")]
#[command(about = "Freobus - cross-dApp session coordination", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Config file path (falls back to FREOBUS_CONFIG, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration as TOML
    Config(config::ConfigArgs),

    /// Run wallet and dApp contexts against one in-process channel
    Simulate(simulate::SimulateArgs),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let loaded = app::load_config(cli.config)?;

    match cli.command {
        Commands::Config(args) => config::run(args, &loaded)?,
        Commands::Simulate(args) => simulate::run(args, loaded.config).await?,
    }

    Ok(())
}
