//! CLI command implementations

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Subcommand;
use mooring_core::{DirectoryKind, DirectoryManager, MooringConfig, Orchestrator, SimulatedEngine};
use tracing::{info, warn};

const STATUS_INTERVAL: Duration = Duration::from_secs(5);

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Resume in-progress transfers, admit new ones and run until Ctrl-C
    Run {
        /// Magnet URIs or descriptor file paths
        sources: Vec<String>,
    },
    /// List the visible entries of a layout directory
    List {
        #[arg(value_enum)]
        kind: DirectoryKind,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Startup failures only; per-source admission failures are logged
pub async fn handle_command(command: Commands, config: MooringConfig) -> anyhow::Result<()> {
    match command {
        Commands::Run { sources } => run(config, sources).await,
        Commands::List { kind } => list(config, kind).await,
    }
}

async fn run(config: MooringConfig, sources: Vec<String>) -> anyhow::Result<()> {
    let engine = Arc::new(SimulatedEngine::new(config.simulation.clone()));
    let orchestrator = Orchestrator::start(&config, engine)
        .await
        .context("Failed to start lifecycle orchestrator")?;

    info!(root = %config.layout.root.display(), "Mooring running");

    match orchestrator.resume_in_progress().await {
        Ok(0) => {}
        Ok(resumed) => info!(resumed, "Resumed in-progress transfers"),
        Err(e) => warn!(error = %e, "Could not scan in-progress descriptors"),
    }

    for source in &sources {
        let admitted = if source.starts_with("magnet:") {
            orchestrator.admit_magnet(source).await
        } else {
            orchestrator.admit_path(Path::new(source)).await
        };

        match admitted {
            Ok(transfer) => info!(info_hash = %transfer.info_hash(), %source, "Admitted"),
            Err(e) => warn!(%source, error = %e, "Admission failed"),
        }
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut status_interval = tokio::time::interval(STATUS_INTERVAL);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                break;
            }
            _ = status_interval.tick() => log_statuses(&orchestrator),
        }
    }

    orchestrator.shutdown().await;
    info!("Mooring stopped");
    Ok(())
}

fn log_statuses(orchestrator: &Orchestrator) {
    for status in orchestrator.statuses() {
        info!(
            info_hash = %status.info_hash,
            name = %status.display_name(),
            progress = %format!("{:.1}%", status.progress * 100.0),
            completed_pieces = status.completed_pieces,
            piece_count = status.piece_count,
            has_metadata = status.has_metadata,
            "Transfer status"
        );
    }
}

async fn list(config: MooringConfig, kind: DirectoryKind) -> anyhow::Result<()> {
    let directories = DirectoryManager::new(&config.layout);
    let entries = directories
        .list_entries(kind)
        .await
        .with_context(|| format!("Failed to list {kind} directory"))?;

    println!("{} ({})", kind, directories.directory(kind).display());
    println!("{:-<60}", "");

    if entries.is_empty() {
        println!("No entries.");
        return Ok(());
    }

    for entry in entries {
        let marker = if entry.is_dir { "/" } else { "" };
        println!("{:<48} {:>10}", format!("{}{marker}", entry.name), entry.size);
    }

    Ok(())
}
