//! Directory manager for the data, in-progress and completed directories

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::StorageError;
use crate::config::LayoutConfig;
use crate::torrent::InfoHash;

#[cfg(unix)]
const DIRECTORY_MODE: u32 = 0o755;
#[cfg(unix)]
const DESCRIPTOR_MODE: u32 = 0o640;

/// One of the three layout directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryKind {
    /// Transfer payloads written by the engine
    Data,
    /// Descriptors of transfers still downloading
    Downloading,
    /// Descriptors of completed transfers
    Downloaded,
}

impl fmt::Display for DirectoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DirectoryKind::Data => "data",
            DirectoryKind::Downloading => "downloading",
            DirectoryKind::Downloaded => "downloaded",
        };
        f.write_str(name)
    }
}

/// Visible entry of a layout directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryEntry {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
    pub size: u64,
}

/// Result of an idempotent descriptor save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Descriptor was created at the path
    Written(PathBuf),
    /// The same descriptor was already in progress at the path
    AlreadyPresent(PathBuf),
    /// The same descriptor was moved back from the completed directory
    Restored(PathBuf),
    /// A different descriptor owns the name; nothing was written
    Collision(PathBuf),
}

impl SaveOutcome {
    /// Path involved in the outcome. For a collision this is the foreign file.
    pub fn path(&self) -> &Path {
        match self {
            SaveOutcome::Written(path)
            | SaveOutcome::AlreadyPresent(path)
            | SaveOutcome::Restored(path)
            | SaveOutcome::Collision(path) => path,
        }
    }
}

/// Platform metadata and dot-files that listings never show.
pub fn is_hidden_entry(name: &str) -> bool {
    name.starts_with('.')
        || name.eq_ignore_ascii_case("Thumbs.db")
        || name.eq_ignore_ascii_case("desktop.ini")
}

/// Computes the descriptor file name for a transfer.
///
/// `<name>.<extension>` when the transfer has a usable name, otherwise
/// `<hex info hash>.<extension>`. Path separators and NUL in the name are
/// replaced with `_`; a name reducing to `.` or `..` counts as unusable.
/// Every descriptor path in the crate is derived from this function.
pub fn descriptor_file_name(name: &str, info_hash: InfoHash, extension: &str) -> String {
    match sanitize_name(name) {
        Some(name) => format!("{name}.{extension}"),
        None => format!("{}.{extension}", info_hash.to_hex()),
    }
}

fn sanitize_name(name: &str) -> Option<String> {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            other => other,
        })
        .collect();

    match sanitized.as_str() {
        "" | "." | ".." => None,
        _ => Some(sanitized),
    }
}

/// Owns the three layout directories and every file operation on them.
#[derive(Debug, Clone)]
pub struct DirectoryManager {
    data_dir: PathBuf,
    downloading_dir: PathBuf,
    downloaded_dir: PathBuf,
    descriptor_extension: String,
}

impl DirectoryManager {
    /// Creates a manager for the directories described by `layout`.
    ///
    /// Nothing is touched on disk until [`ensure_layout`](Self::ensure_layout).
    pub fn new(layout: &LayoutConfig) -> Self {
        let directories = layout.directories();
        Self {
            data_dir: directories.data,
            downloading_dir: directories.downloading,
            downloaded_dir: directories.downloaded,
            descriptor_extension: layout.descriptor_extension.clone(),
        }
    }

    /// Absolute path of a layout directory.
    pub fn directory(&self, kind: DirectoryKind) -> &Path {
        match kind {
            DirectoryKind::Data => &self.data_dir,
            DirectoryKind::Downloading => &self.downloading_dir,
            DirectoryKind::Downloaded => &self.downloaded_dir,
        }
    }

    /// Extension given to descriptor files, without the leading dot.
    pub fn descriptor_extension(&self) -> &str {
        &self.descriptor_extension
    }

    /// Descriptor file name for a transfer under this layout.
    pub fn descriptor_name(&self, name: &str, info_hash: InfoHash) -> String {
        descriptor_file_name(name, info_hash, &self.descriptor_extension)
    }

    /// Identifier-only descriptor name, used when the display name is taken.
    pub fn hex_descriptor_name(&self, info_hash: InfoHash) -> String {
        descriptor_file_name("", info_hash, &self.descriptor_extension)
    }

    /// Creates the three layout directories if they do not exist yet.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - A directory could not be created
    pub async fn ensure_layout(&self) -> Result<(), StorageError> {
        for dir in [&self.data_dir, &self.downloading_dir, &self.downloaded_dir] {
            let mut builder = fs::DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            builder.mode(DIRECTORY_MODE);

            builder
                .create(dir)
                .await
                .map_err(|e| StorageError::io(dir, e))?;
        }

        tracing::debug!(
            data = %self.data_dir.display(),
            downloading = %self.downloading_dir.display(),
            downloaded = %self.downloaded_dir.display(),
            "Layout ready"
        );
        Ok(())
    }

    /// Lists the visible entries of a layout directory, sorted by name.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - Directory could not be read
    pub async fn list_entries(
        &self,
        kind: DirectoryKind,
    ) -> Result<Vec<DirectoryEntry>, StorageError> {
        let dir = self.directory(kind);
        let mut reader = fs::read_dir(dir)
            .await
            .map_err(|e| StorageError::io(dir, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| StorageError::io(dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_hidden_entry(&name) {
                continue;
            }

            let path = entry.path();
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Entry vanished while listing");
                    continue;
                }
            };

            entries.push(DirectoryEntry {
                name,
                path,
                is_dir: metadata.is_dir(),
                size: metadata.len(),
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Paths of descriptor files waiting in the in-progress directory.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - Directory could not be read
    pub async fn in_progress_descriptors(&self) -> Result<Vec<PathBuf>, StorageError> {
        let entries = self.list_entries(DirectoryKind::Downloading).await?;

        Ok(entries
            .into_iter()
            .filter(|entry| !entry.is_dir)
            .filter(|entry| {
                entry.path.extension().and_then(|ext| ext.to_str())
                    == Some(self.descriptor_extension.as_str())
            })
            .map(|entry| entry.path)
            .collect())
    }

    /// Writes a descriptor into the in-progress directory, first write wins.
    ///
    /// An existing file at the target path is never overwritten. Identical
    /// bytes report [`SaveOutcome::AlreadyPresent`]; anything else means a
    /// different transfer owns the name and reports [`SaveOutcome::Collision`].
    /// A matching descriptor in the completed directory is moved back rather
    /// than duplicated, so the name lives in one directory at a time.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - Descriptor could not be created or written
    pub async fn save_descriptor(
        &self,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<SaveOutcome, StorageError> {
        let path = self.downloading_dir.join(file_name);

        if let Some(outcome) = self.reclaim_completed(file_name, bytes).await? {
            return Ok(outcome);
        }

        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(DESCRIPTOR_MODE);

        let mut file = match options.open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Ok(if same_contents(&path, bytes).await {
                    tracing::debug!(path = %path.display(), "Descriptor already saved");
                    SaveOutcome::AlreadyPresent(path)
                } else {
                    tracing::warn!(
                        path = %path.display(),
                        "Descriptor name already used by a different transfer"
                    );
                    SaveOutcome::Collision(path)
                });
            }
            Err(e) => return Err(StorageError::io(path, e)),
        };

        let written = async {
            file.write_all(bytes).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = written {
            drop(file);
            if let Err(cleanup) = fs::remove_file(&path).await {
                tracing::debug!(path = %path.display(), error = %cleanup, "Could not remove partial descriptor");
            }
            return Err(StorageError::io(path, e));
        }

        Ok(SaveOutcome::Written(path))
    }

    /// Handles a descriptor of the same name already in the completed directory.
    ///
    /// Returns `None` when the completed directory has no such file, or when
    /// the in-progress directory is already occupied and decides on its own.
    async fn reclaim_completed(
        &self,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<Option<SaveOutcome>, StorageError> {
        let completed = self.downloaded_dir.join(file_name);
        let existing = match fs::read(&completed).await {
            Ok(existing) => existing,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(completed, e)),
        };

        if existing != bytes {
            tracing::warn!(
                path = %completed.display(),
                "Descriptor name already used by a completed transfer"
            );
            return Ok(Some(SaveOutcome::Collision(completed)));
        }

        let in_progress = self.downloading_dir.join(file_name);
        match fs::symlink_metadata(&in_progress).await {
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::io(in_progress, e)),
        }

        fs::rename(&completed, &in_progress)
            .await
            .map_err(|e| StorageError::io(&completed, e))?;
        tracing::info!(path = %in_progress.display(), "Completed descriptor moved back to in-progress");
        Ok(Some(SaveOutcome::Restored(in_progress)))
    }

    /// Moves a descriptor from the in-progress to the completed directory.
    ///
    /// Returns the new path.
    ///
    /// # Errors
    ///
    /// - `StorageError::DescriptorNotFound` - No such descriptor in progress
    /// - `StorageError::Io` - Rename failed
    pub async fn promote_descriptor(&self, file_name: &str) -> Result<PathBuf, StorageError> {
        let source = self.downloading_dir.join(file_name);
        let destination = self.downloaded_dir.join(file_name);

        match fs::rename(&source, &destination).await {
            Ok(()) => Ok(destination),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::DescriptorNotFound { path: source })
            }
            Err(e) => Err(StorageError::io(source, e)),
        }
    }

    /// Deletes a descriptor from whichever descriptor directory holds it.
    ///
    /// Best effort: each directory is tried independently and failures are
    /// logged. Returns the paths that were removed.
    pub async fn remove_descriptor(&self, file_name: &str) -> Vec<PathBuf> {
        let mut removed = Vec::new();

        for dir in [&self.downloading_dir, &self.downloaded_dir] {
            let path = dir.join(file_name);
            match remove_path(&path).await {
                Ok(true) => removed.push(path),
                Ok(false) => {}
                Err(e) => tracing::warn!(error = %e, "Failed to remove descriptor"),
            }
        }

        removed
    }

    /// Recursively deletes a transfer's payload from the data directory.
    ///
    /// Returns the removed path, or `None` when the name is unusable or
    /// nothing was there.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - Payload exists but could not be removed
    pub async fn remove_data(&self, name: &str) -> Result<Option<PathBuf>, StorageError> {
        let Some(entry_name) = sanitize_name(name) else {
            return Ok(None);
        };

        let path = self.data_dir.join(entry_name);
        Ok(remove_path(&path).await?.then_some(path))
    }
}

/// Whether the file at `path` holds exactly `bytes`. Unreadable counts as different.
async fn same_contents(path: &Path, bytes: &[u8]) -> bool {
    match fs::read(path).await {
        Ok(existing) => existing == bytes,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Existing descriptor unreadable");
            false
        }
    }
}

/// Removes a file or directory tree, treating absence as success.
async fn remove_path(path: &Path) -> Result<bool, StorageError> {
    let metadata = match fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(StorageError::io(path, e)),
    };

    let result = if metadata.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    };

    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::io(path, e)),
    }
}
