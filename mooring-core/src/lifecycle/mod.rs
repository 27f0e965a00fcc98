//! Lifecycle orchestration for admitted transfers
//!
//! [`Orchestrator`] is the context object a process builds once at startup. It
//! admits transfers into the engine, hands new ones to the lifecycle loop and
//! exposes snapshots for polling consumers. The loop spawns one completion
//! watcher per new transfer; watchers report metadata arrival and completion
//! back to the loop, which persists and promotes descriptor files.

mod event_loop;
pub mod shutdown;
mod status;
mod watcher;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use self::event_loop::{Admission, LifecycleLoop, LoopRequest, LoopSenders};
use self::shutdown::{ShutdownTrigger, shutdown_channel};
pub use self::status::TransferStatus;
use crate::config::MooringConfig;
use crate::engine::{Admitted, SharedTransfer, TransferEngine};
use crate::storage::{DirectoryEntry, DirectoryKind, DirectoryManager, StorageError};
use crate::torrent::{InfoHash, TorrentError};

/// Errors surfaced by orchestrator operations.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// Admission or engine failure, passed through unchanged
    #[error(transparent)]
    Torrent(#[from] TorrentError),

    /// Layout or descriptor file failure
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Lifecycle loop is no longer running
    #[error("Lifecycle loop has stopped")]
    Stopped,
}

/// What a user cancellation removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelReport {
    pub info_hash: InfoHash,
    /// Descriptor files deleted, at most one per descriptor directory
    pub removed_descriptors: Vec<PathBuf>,
    /// Payload deleted from the data directory, when requested and present
    pub removed_data: Option<PathBuf>,
}

/// Owns the lifecycle loop and the shared shutdown signal.
pub struct Orchestrator {
    engine: Arc<dyn TransferEngine>,
    directories: DirectoryManager,
    senders: LoopSenders,
    shutdown: ShutdownTrigger,
    active_watchers: Arc<AtomicUsize>,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Ensures the directory layout and starts the lifecycle loop.
    ///
    /// # Errors
    ///
    /// - `LifecycleError::Storage` - Layout directories could not be created
    pub async fn start(
        config: &MooringConfig,
        engine: Arc<dyn TransferEngine>,
    ) -> Result<Self, LifecycleError> {
        let (orchestrator, lifecycle_loop) = Self::assemble(config, engine);
        orchestrator.directories.ensure_layout().await?;

        *orchestrator.loop_task.lock() = Some(tokio::spawn(lifecycle_loop.run()));
        tracing::info!(
            capacity = config.lifecycle.effective_capacity(),
            "Lifecycle orchestrator started"
        );

        Ok(orchestrator)
    }

    /// Builds the orchestrator and its loop without running the loop.
    fn assemble(config: &MooringConfig, engine: Arc<dyn TransferEngine>) -> (Self, LifecycleLoop) {
        let directories = DirectoryManager::new(&config.layout);
        let (trigger, signal) = shutdown_channel();
        let active_watchers = Arc::new(AtomicUsize::new(0));

        let (lifecycle_loop, senders) = LifecycleLoop::new(
            Arc::clone(&engine),
            directories.clone(),
            signal,
            config.lifecycle.effective_capacity(),
            Arc::clone(&active_watchers),
        );

        let orchestrator = Self {
            engine,
            directories,
            senders,
            shutdown: trigger,
            active_watchers,
            loop_task: Mutex::new(None),
        };

        (orchestrator, lifecycle_loop)
    }

    /// Admits a transfer from raw descriptor bytes.
    ///
    /// Waits while the loop has an undrained admission buffered.
    ///
    /// # Errors
    ///
    /// - `LifecycleError::Torrent` - Engine rejected the descriptor
    /// - `LifecycleError::Stopped` - Orchestrator is shutting down
    pub async fn admit_descriptor(&self, descriptor: Vec<u8>) -> Result<SharedTransfer, LifecycleError> {
        self.ensure_running()?;
        let admitted = self.engine.admit_descriptor(descriptor).await?;
        self.enqueue(admitted, None).await
    }

    /// Admits a transfer from a magnet URI.
    ///
    /// # Errors
    ///
    /// - `LifecycleError::Torrent` - Malformed URI or engine failure
    /// - `LifecycleError::Stopped` - Orchestrator is shutting down
    pub async fn admit_magnet(&self, uri: &str) -> Result<SharedTransfer, LifecycleError> {
        self.ensure_running()?;
        let admitted = self.engine.admit_magnet(uri).await?;
        self.enqueue(admitted, None).await
    }

    /// Admits a transfer from a descriptor file on disk.
    ///
    /// # Errors
    ///
    /// - `LifecycleError::Torrent` - File unreadable or malformed
    /// - `LifecycleError::Stopped` - Orchestrator is shutting down
    pub async fn admit_path(&self, path: &Path) -> Result<SharedTransfer, LifecycleError> {
        self.ensure_running()?;
        let admitted = self.engine.admit_path(path).await?;
        self.enqueue(admitted, None).await
    }

    /// Re-admits every descriptor left in the in-progress directory.
    ///
    /// Unreadable or malformed descriptors are logged and skipped. Returns the
    /// number of transfers that were newly admitted.
    ///
    /// # Errors
    ///
    /// - `LifecycleError::Storage` - In-progress directory could not be read
    /// - `LifecycleError::Stopped` - Orchestrator is shutting down
    pub async fn resume_in_progress(&self) -> Result<usize, LifecycleError> {
        self.ensure_running()?;
        let descriptors = self.directories.in_progress_descriptors().await?;
        let mut resumed = 0;

        for path in descriptors {
            let admitted = match self.engine.admit_path(&path).await {
                Ok(admitted) => admitted,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable descriptor");
                    continue;
                }
            };

            let is_new = admitted.is_new;
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned());
            self.enqueue(admitted, file_name).await?;

            if is_new {
                resumed += 1;
            }
        }

        tracing::info!(resumed, "Resumed in-progress transfers");
        Ok(resumed)
    }

    /// Cancels a transfer on behalf of the user.
    ///
    /// The loop closes the transfer, deletes its descriptor from whichever
    /// directory holds it and, when `remove_data` is set, its payload.
    ///
    /// # Errors
    ///
    /// - `LifecycleError::Torrent` - Engine does not hold the transfer
    /// - `LifecycleError::Stopped` - Orchestrator is shutting down
    pub async fn cancel(
        &self,
        info_hash: InfoHash,
        remove_data: bool,
    ) -> Result<CancelReport, LifecycleError> {
        self.ensure_running()?;
        let (responder, response) = oneshot::channel();

        self.senders
            .requests
            .send(LoopRequest::Cancel {
                info_hash,
                remove_data,
                responder,
            })
            .await
            .map_err(|_| LifecycleError::Stopped)?;

        response.await.map_err(|_| LifecycleError::Stopped)?
    }

    /// Snapshots of every transfer the engine holds, sorted by name.
    pub fn statuses(&self) -> Vec<TransferStatus> {
        let mut statuses: Vec<TransferStatus> = self
            .engine
            .transfers()
            .iter()
            .map(|transfer| TransferStatus::from_handle(transfer.as_ref()))
            .collect();

        statuses.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| a.info_hash.cmp(&b.info_hash))
        });
        statuses
    }

    /// Snapshot of one transfer, if the engine holds it.
    pub fn status(&self, info_hash: InfoHash) -> Option<TransferStatus> {
        self.engine
            .transfer(info_hash)
            .map(|transfer| TransferStatus::from_handle(transfer.as_ref()))
    }

    /// Visible entries of a layout directory.
    ///
    /// # Errors
    ///
    /// - `LifecycleError::Storage` - Directory could not be read
    pub async fn list_entries(&self, kind: DirectoryKind) -> Result<Vec<DirectoryEntry>, LifecycleError> {
        Ok(self.directories.list_entries(kind).await?)
    }

    pub fn directories(&self) -> &DirectoryManager {
        &self.directories
    }

    /// Number of completion watchers still running.
    pub fn active_watchers(&self) -> usize {
        self.active_watchers.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_triggered()
    }

    /// Closes the shutdown signal and waits for the loop to exit.
    ///
    /// Watchers unblock and exit on their own. Calling this again is a no-op.
    pub async fn shutdown(&self) {
        if self.shutdown.trigger() {
            tracing::info!("Lifecycle orchestrator shutting down");
        }

        let task = self.loop_task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            tracing::warn!(error = %e, "Lifecycle loop task failed");
        }
    }

    fn ensure_running(&self) -> Result<(), LifecycleError> {
        if self.shutdown.is_triggered() {
            Err(LifecycleError::Stopped)
        } else {
            Ok(())
        }
    }

    /// Hands a new transfer to the loop; known transfers already have a watcher.
    async fn enqueue(
        &self,
        admitted: Admitted,
        existing_descriptor: Option<String>,
    ) -> Result<SharedTransfer, LifecycleError> {
        let Admitted { handle, is_new } = admitted;

        if !is_new {
            tracing::debug!(info_hash = %handle.info_hash(), "Transfer already admitted");
            return Ok(handle);
        }

        self.senders
            .admitted
            .send(Admission {
                transfer: Arc::clone(&handle),
                existing_descriptor,
            })
            .await
            .map_err(|_| LifecycleError::Stopped)?;

        Ok(handle)
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}
