//! Mooring CLI - process entry point for the transfer lifecycle

mod commands;

use std::path::PathBuf;

use clap::Parser;
use mooring_core::MooringConfig;
use mooring_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "mooring")]
#[command(about = "Moves peer-to-peer transfers from in-progress to completed")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,

    /// Root directory holding data, downloading and downloaded
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Console log level
    #[arg(long, global = true, value_enum, default_value_t = CliLogLevel::Info)]
    log_level: CliLogLevel,

    /// Directory for the full trace log of this run
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref())?;

    let mut config = MooringConfig::from_env();
    if let Some(root) = cli.root {
        config.layout.root = root;
    }

    commands::handle_command(cli.command, config).await
}
