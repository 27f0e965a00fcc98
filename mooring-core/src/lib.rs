//! Mooring Core - lifecycle orchestration for peer-to-peer transfers
//!
//! This crate moves transfers through their on-disk lifecycle: admission from
//! a descriptor, magnet URI or persisted in-progress descriptor, metadata
//! acquisition, piece completion, and relocation of the descriptor file from
//! the in-progress directory to the completed one. Piece download itself is
//! delegated to a [`TransferEngine`].

pub mod config;
pub mod engine;
pub mod lifecycle;
pub mod storage;
pub mod torrent;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::MooringConfig;
pub use engine::{SimulatedEngine, TransferEngine, TransferHandle};
pub use lifecycle::{LifecycleError, Orchestrator, TransferStatus};
pub use storage::{DirectoryKind, DirectoryManager, StorageError};
pub use torrent::{InfoHash, TorrentError};

/// Core errors that can bubble up from any Mooring subsystem.
#[derive(Debug, thiserror::Error)]
pub enum MooringError {
    #[error("Torrent error: {0}")]
    Torrent(#[from] TorrentError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MooringError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            MooringError::Torrent(e) | MooringError::Lifecycle(LifecycleError::Torrent(e)) => {
                match e {
                    TorrentError::InvalidTorrentFile { reason } => {
                        format!("Invalid torrent file: {reason}")
                    }
                    TorrentError::InvalidMagnetLink { reason } => {
                        format!("Invalid magnet link: {reason}")
                    }
                    TorrentError::TorrentNotFound { info_hash } => {
                        format!("Torrent {info_hash} not found")
                    }
                    _ => "Transfer error occurred".to_string(),
                }
            }
            MooringError::Storage(_) | MooringError::Lifecycle(LifecycleError::Storage(_)) => {
                "Storage error occurred".to_string()
            }
            MooringError::Lifecycle(LifecycleError::Stopped) => {
                "Transfer manager is shutting down".to_string()
            }
            MooringError::Configuration { .. } => "Configuration error occurred".to_string(),
            MooringError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            MooringError::Configuration { .. }
                | MooringError::Torrent(
                    TorrentError::InvalidTorrentFile { .. } | TorrentError::InvalidMagnetLink { .. }
                )
                | MooringError::Lifecycle(LifecycleError::Torrent(
                    TorrentError::InvalidTorrentFile { .. } | TorrentError::InvalidMagnetLink { .. }
                ))
        )
    }
}

pub type Result<T> = std::result::Result<T, MooringError>;
