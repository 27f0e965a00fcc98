//! On-disk layout for transfer payloads and descriptor files.
//!
//! Three directories live under a common root: payload data, descriptors of
//! transfers still downloading, and descriptors of completed transfers. The
//! lifecycle loop is the only writer of descriptor files.

pub mod layout;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_fixtures;

use std::path::PathBuf;

pub use layout::{
    DirectoryEntry, DirectoryKind, DirectoryManager, SaveOutcome, descriptor_file_name,
    is_hidden_entry,
};

/// Errors that occur during layout and descriptor file operations.
///
/// These are persistence failures: the lifecycle loop logs and absorbs them
/// while the affected transfer keeps running in the engine.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Descriptor expected at `path` does not exist
    #[error("Descriptor not found: {}", path.display())]
    DescriptorNotFound {
        /// Path that was expected to hold the descriptor
        path: PathBuf,
    },

    /// File system operation on `path` failed
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// Path the failed operation targeted
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
