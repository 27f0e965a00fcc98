//! Lifecycle event loop
//!
//! A single task owns every descriptor write and every engine-mutating
//! command. Producers hand it work over bounded channels; it services one
//! ready event per iteration until shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::shutdown::ShutdownSignal;
use super::watcher::CompletionWatcher;
use super::{CancelReport, LifecycleError};
use crate::engine::{SharedTransfer, TransferEngine};
use crate::storage::{DirectoryManager, SaveOutcome};
use crate::torrent::{InfoHash, TorrentError};

/// A newly admitted transfer handed to the loop.
pub(crate) struct Admission {
    pub(crate) transfer: SharedTransfer,
    /// Descriptor file already on disk in the in-progress directory
    pub(crate) existing_descriptor: Option<String>,
}

/// Requests answered by the loop.
pub(crate) enum LoopRequest {
    Cancel {
        info_hash: InfoHash,
        remove_data: bool,
        responder: oneshot::Sender<Result<CancelReport, LifecycleError>>,
    },
}

/// Producer side of the loop's input channels.
#[derive(Clone)]
pub(crate) struct LoopSenders {
    pub(crate) admitted: mpsc::Sender<Admission>,
    pub(crate) requests: mpsc::Sender<LoopRequest>,
}

/// A transfer detached after completion, with its relocated descriptor.
struct Promoted {
    name: String,
    file_name: String,
}

/// Counts live watchers; each watcher holds one guard.
struct WatcherGuard(Arc<AtomicUsize>);

impl WatcherGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for WatcherGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) struct LifecycleLoop {
    engine: Arc<dyn TransferEngine>,
    directories: DirectoryManager,
    shutdown: ShutdownSignal,
    admitted_rx: mpsc::Receiver<Admission>,
    metadata_tx: mpsc::Sender<SharedTransfer>,
    metadata_rx: mpsc::Receiver<SharedTransfer>,
    completed_tx: mpsc::Sender<SharedTransfer>,
    completed_rx: mpsc::Receiver<SharedTransfer>,
    requests_rx: mpsc::Receiver<LoopRequest>,
    /// Descriptor file name each in-progress transfer is persisted under
    saved: HashMap<InfoHash, String>,
    /// Transfers promoted during this run, still cancellable by info hash
    promoted: HashMap<InfoHash, Promoted>,
    active_watchers: Arc<AtomicUsize>,
}

impl LifecycleLoop {
    /// Creates the loop with `capacity`-bounded channels.
    pub(crate) fn new(
        engine: Arc<dyn TransferEngine>,
        directories: DirectoryManager,
        shutdown: ShutdownSignal,
        capacity: usize,
        active_watchers: Arc<AtomicUsize>,
    ) -> (Self, LoopSenders) {
        let capacity = capacity.max(1);
        let (admitted_tx, admitted_rx) = mpsc::channel(capacity);
        let (metadata_tx, metadata_rx) = mpsc::channel(capacity);
        let (completed_tx, completed_rx) = mpsc::channel(capacity);
        let (requests_tx, requests_rx) = mpsc::channel(capacity);

        let lifecycle_loop = Self {
            engine,
            directories,
            shutdown,
            admitted_rx,
            metadata_tx,
            metadata_rx,
            completed_tx,
            completed_rx,
            requests_rx,
            saved: HashMap::new(),
            promoted: HashMap::new(),
            active_watchers,
        };
        let senders = LoopSenders {
            admitted: admitted_tx,
            requests: requests_tx,
        };

        (lifecycle_loop, senders)
    }

    /// Services events until shutdown. Stage failures never end the loop.
    pub(crate) async fn run(mut self) {
        debug!("Lifecycle loop started");

        loop {
            if self.shutdown.is_triggered() {
                break;
            }

            tokio::select! {
                () = self.shutdown.wait() => break,
                Some(admission) = self.admitted_rx.recv() => self.on_admitted(admission),
                Some(transfer) = self.metadata_rx.recv() => self.on_metadata_ready(transfer).await,
                Some(transfer) = self.completed_rx.recv() => self.on_completed(transfer).await,
                Some(request) = self.requests_rx.recv() => self.on_request(request).await,
                else => break,
            }
        }

        debug!("Lifecycle loop stopped");
    }

    fn on_admitted(&mut self, admission: Admission) {
        let transfer = admission.transfer;
        let info_hash = transfer.info_hash();

        self.promoted.remove(&info_hash);
        if let Some(file_name) = admission.existing_descriptor {
            self.saved.insert(info_hash, file_name);
        }

        info!(%info_hash, name = %transfer.name(), "Transfer admitted");

        let watcher = CompletionWatcher::new(
            transfer,
            self.metadata_tx.clone(),
            self.completed_tx.clone(),
            self.shutdown.clone(),
        );
        let guard = WatcherGuard::new(&self.active_watchers);

        tokio::spawn(async move {
            let _guard = guard;
            let outcome = watcher.run().await;
            debug!(%info_hash, ?outcome, "Watcher finished");
        });
    }

    async fn on_metadata_ready(&mut self, transfer: SharedTransfer) {
        let info_hash = transfer.info_hash();
        if transfer.is_closed() {
            debug!(%info_hash, "Skipping metadata of closed transfer");
            return;
        }

        transfer.start_full_download();
        debug!(%info_hash, "Full download started");

        if let Some(file_name) = self.saved.get(&info_hash) {
            debug!(%info_hash, file_name = %file_name, "Descriptor already persisted");
            return;
        }

        let descriptor = match transfer.serialized_descriptor() {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!(%info_hash, error = %e, "Descriptor unavailable, not persisted");
                return;
            }
        };

        self.persist(info_hash, &transfer.name(), &descriptor).await;
    }

    /// Saves under the display name, or the identifier when the name is taken.
    ///
    /// Only a name that holds this transfer's own descriptor is recorded, so
    /// promotion and cancellation never touch another transfer's file.
    async fn persist(&mut self, info_hash: InfoHash, name: &str, descriptor: &[u8]) {
        let preferred = self.directories.descriptor_name(name, info_hash);
        let fallback = self.directories.hex_descriptor_name(info_hash);
        let candidates = if preferred == fallback {
            vec![preferred]
        } else {
            vec![preferred, fallback]
        };

        for file_name in candidates {
            match self.directories.save_descriptor(&file_name, descriptor).await {
                Ok(SaveOutcome::Written(path)) => {
                    info!(%info_hash, path = %path.display(), "Descriptor saved");
                }
                Ok(SaveOutcome::AlreadyPresent(path)) => {
                    debug!(%info_hash, path = %path.display(), "Descriptor already present");
                }
                Ok(SaveOutcome::Restored(path)) => {
                    info!(%info_hash, path = %path.display(), "Descriptor back in progress");
                }
                Ok(SaveOutcome::Collision(path)) => {
                    debug!(%info_hash, path = %path.display(), "Descriptor name taken, trying next");
                    continue;
                }
                Err(e) => {
                    warn!(%info_hash, error = %e, "Failed to save descriptor, transfer continues");
                    return;
                }
            }

            self.saved.insert(info_hash, file_name);
            return;
        }

        warn!(%info_hash, "Every descriptor name is taken, transfer not persisted");
    }

    async fn on_completed(&mut self, transfer: SharedTransfer) {
        let info_hash = transfer.info_hash();
        if transfer.is_closed() {
            debug!(%info_hash, "Skipping completion of closed transfer");
            self.saved.remove(&info_hash);
            return;
        }

        let name = transfer.name();
        transfer.detach();

        let Some(file_name) = self.saved.remove(&info_hash) else {
            warn!(%info_hash, name = %name, "Transfer complete without a persisted descriptor");
            return;
        };

        match self.directories.promote_descriptor(&file_name).await {
            Ok(path) => {
                info!(%info_hash, name = %name, path = %path.display(), "Transfer complete");
                self.promoted.insert(info_hash, Promoted { name, file_name });
            }
            Err(e) => {
                warn!(%info_hash, error = %e, "Transfer complete but descriptor not promoted");
            }
        }
    }

    async fn on_request(&mut self, request: LoopRequest) {
        match request {
            LoopRequest::Cancel {
                info_hash,
                remove_data,
                responder,
            } => {
                let result = self.cancel(info_hash, remove_data).await;
                let _ = responder.send(result);
            }
        }
    }

    async fn cancel(
        &mut self,
        info_hash: InfoHash,
        remove_data: bool,
    ) -> Result<CancelReport, LifecycleError> {
        let (name, file_name) = match self.engine.transfer(info_hash) {
            Some(transfer) => {
                let name = transfer.name();
                transfer.close();
                (name, self.saved.remove(&info_hash))
            }
            None => {
                let promoted = self
                    .promoted
                    .remove(&info_hash)
                    .ok_or(TorrentError::TorrentNotFound { info_hash })?;
                (promoted.name, Some(promoted.file_name))
            }
        };
        info!(%info_hash, name = %name, remove_data, "Transfer cancelled");

        let removed_descriptors = match file_name {
            Some(file_name) => self.directories.remove_descriptor(&file_name).await,
            None => Vec::new(),
        };

        let removed_data = if remove_data {
            match self.directories.remove_data(&name).await {
                Ok(removed) => removed,
                Err(e) => {
                    warn!(%info_hash, error = %e, "Failed to remove data");
                    None
                }
            }
        } else {
            None
        };

        Ok(CancelReport {
            info_hash,
            removed_descriptors,
            removed_data,
        })
    }
}
