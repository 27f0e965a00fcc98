//! Centralized configuration for Mooring.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Central configuration for all Mooring components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct MooringConfig {
    pub layout: LayoutConfig,
    pub lifecycle: LifecycleConfig,
    pub simulation: SimulationConfig,
}

/// On-disk layout of the transfer directories.
///
/// Three sibling directories live under `root`: downloaded payloads, descriptors
/// of transfers still in progress, and descriptors of finished transfers.
#[derive(Debug, Clone)]
pub struct LayoutConfig {
    /// Directory holding the three layout directories
    pub root: PathBuf,
    /// Directory name for transfer payloads
    pub data_dir_name: String,
    /// Directory name for in-progress descriptors
    pub downloading_dir_name: String,
    /// Directory name for completed descriptors
    pub downloaded_dir_name: String,
    /// Descriptor file extension, without the leading dot
    pub descriptor_extension: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        let root = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mooring");

        Self::with_root(root)
    }
}

impl LayoutConfig {
    /// Creates the default layout under a custom root directory.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            data_dir_name: "data".to_string(),
            downloading_dir_name: "downloading".to_string(),
            downloaded_dir_name: "downloaded".to_string(),
            descriptor_extension: "torrent".to_string(),
        }
    }

    /// Absolute paths of the three layout directories.
    pub fn directories(&self) -> LayoutDirectories {
        LayoutDirectories {
            data: self.root.join(&self.data_dir_name),
            downloading: self.root.join(&self.downloading_dir_name),
            downloaded: self.root.join(&self.downloaded_dir_name),
        }
    }
}

/// Resolved layout directory paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutDirectories {
    pub data: PathBuf,
    pub downloading: PathBuf,
    pub downloaded: PathBuf,
}

/// Lifecycle event loop tuning.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Buffered events per lifecycle channel before producers wait
    pub channel_capacity: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1,
        }
    }
}

impl LifecycleConfig {
    /// Channel capacity clamped to the minimum tokio accepts.
    pub fn effective_capacity(&self) -> usize {
        self.channel_capacity.max(1)
    }
}

/// Simulated transfer engine configuration for development and testing.
///
/// `None` intervals disable the corresponding background progress so tests can
/// drive the engine explicitly.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Delay between simulated piece completions after full download starts
    pub piece_interval: Option<Duration>,
    /// Delay before a magnet admission receives its metadata
    pub magnet_resolve_delay: Option<Duration>,
    /// Piece count synthesized for resolved magnet transfers
    pub magnet_piece_count: u32,
    /// Piece length synthesized for resolved magnet transfers
    pub magnet_piece_length: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            piece_interval: Some(Duration::from_millis(250)),
            magnet_resolve_delay: Some(Duration::from_secs(2)),
            magnet_piece_count: 16,
            magnet_piece_length: 262_144, // 256 KiB
        }
    }
}

impl SimulationConfig {
    /// Creates a configuration where nothing progresses on its own.
    pub fn manual() -> Self {
        Self {
            piece_interval: None,
            magnet_resolve_delay: None,
            magnet_piece_count: 4,
            magnet_piece_length: 16_384,
        }
    }
}

impl MooringConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(root) = std::env::var_os("MOORING_ROOT") {
            config.layout.root = PathBuf::from(root);
        }

        if let Ok(capacity) = std::env::var("MOORING_CHANNEL_CAPACITY")
            && let Ok(capacity) = capacity.parse::<usize>()
        {
            config.lifecycle.channel_capacity = capacity;
        }

        if let Some(interval) = Self::millis_from_env("MOORING_SIM_PIECE_INTERVAL_MS") {
            config.simulation.piece_interval = interval;
        }

        if let Some(delay) = Self::millis_from_env("MOORING_SIM_MAGNET_DELAY_MS") {
            config.simulation.magnet_resolve_delay = delay;
        }

        config
    }

    /// Creates a configuration for tests rooted at `root`.
    pub fn for_testing(root: &Path) -> Self {
        Self {
            layout: LayoutConfig::with_root(root),
            lifecycle: LifecycleConfig::default(),
            simulation: SimulationConfig::manual(),
        }
    }

    /// Reads a millisecond duration where zero disables the behavior.
    ///
    /// Returns `None` when the variable is unset or unparseable.
    fn millis_from_env(key: &str) -> Option<Option<Duration>> {
        let millis = std::env::var(key).ok()?.parse::<u64>().ok()?;
        Some((millis > 0).then(|| Duration::from_millis(millis)))
    }
}
