//! Transfer engine collaborator interface
//!
//! The orchestrator never downloads anything itself. It admits transfers into
//! a [`TransferEngine`], observes each [`TransferHandle`] and issues the two
//! mutating commands it owns: start full download and detach.

pub mod simulated;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use simulated::{SimulatedEngine, SimulatedTransfer};

use crate::torrent::{InfoHash, PieceIndex, TorrentError};

/// Shared handle to a transfer owned by an engine.
pub type SharedTransfer = Arc<dyn TransferHandle>;

/// Result of an admission.
///
/// `is_new` is false when the engine already held a transfer with the same
/// info hash and handed back the existing handle.
#[derive(Clone)]
pub struct Admitted {
    pub handle: SharedTransfer,
    pub is_new: bool,
}

impl fmt::Debug for Admitted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Admitted")
            .field("info_hash", &self.handle.info_hash())
            .field("is_new", &self.is_new)
            .finish()
    }
}

/// Engine that owns transfers and their protocol state.
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Admits a transfer from raw descriptor bytes.
    ///
    /// # Errors
    /// - `TorrentError::InvalidTorrentFile` - Malformed descriptor
    async fn admit_descriptor(&self, descriptor: Vec<u8>) -> Result<Admitted, TorrentError>;

    /// Admits a transfer from a magnet URI. Metadata arrives later.
    ///
    /// # Errors
    /// - `TorrentError::InvalidMagnetLink` - Malformed URI
    async fn admit_magnet(&self, uri: &str) -> Result<Admitted, TorrentError>;

    /// Admits a transfer from a descriptor file on disk.
    ///
    /// # Errors
    /// - `TorrentError::Io` - File could not be read
    /// - `TorrentError::InvalidTorrentFile` - Malformed descriptor
    async fn admit_path(&self, path: &Path) -> Result<Admitted, TorrentError>;

    /// Transfers currently held by the engine, in no particular order.
    fn transfers(&self) -> Vec<SharedTransfer>;

    /// Looks up a held transfer by info hash.
    fn transfer(&self, info_hash: InfoHash) -> Option<SharedTransfer> {
        self.transfers()
            .into_iter()
            .find(|transfer| transfer.info_hash() == info_hash)
    }
}

/// Engine-side view of a single transfer.
///
/// Read accessors return snapshots; the two waits complete once and stay
/// complete.
#[async_trait]
pub trait TransferHandle: Send + Sync {
    /// Content hash identifying the transfer.
    fn info_hash(&self) -> InfoHash;

    /// Human-readable name, possibly empty before metadata arrives.
    fn name(&self) -> String;

    /// Total payload size in bytes, zero before metadata.
    fn total_size(&self) -> u64;

    /// Number of pieces, zero before metadata.
    fn piece_count(&self) -> u32;

    /// Whether the info dictionary is known.
    fn has_metadata(&self) -> bool;

    /// Resolves once metadata is available.
    async fn metadata_ready(&self);

    /// Resolves once the transfer has been closed or detached.
    async fn closed(&self);

    /// Whether the transfer has been closed or detached.
    fn is_closed(&self) -> bool;

    /// Completion flag of a single piece. Out-of-range indices are incomplete.
    fn piece_complete(&self, index: PieceIndex) -> bool;

    /// Number of completed pieces.
    fn completed_pieces(&self) -> u32;

    /// Registers for piece state changes published after this call.
    fn subscribe_piece_changes(&self) -> PieceSubscription;

    /// Requests every piece of the transfer.
    fn start_full_download(&self);

    /// Releases engine resources for the transfer without deleting its data.
    fn detach(&self);

    /// Stops the transfer on behalf of the user.
    fn close(&self) {
        self.detach();
    }

    /// Serialized descriptor for persisting the transfer.
    ///
    /// # Errors
    /// - `TorrentError::DescriptorUnavailable` - Metadata not yet known
    fn serialized_descriptor(&self) -> Result<Vec<u8>, TorrentError>;
}

/// Piece state change published by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceStateChange {
    pub index: PieceIndex,
    pub complete: bool,
}

/// Live piece change subscription.
///
/// Dropping the subscription runs its release hook, unregistering it from the
/// engine on every exit path of the holder.
pub struct PieceSubscription {
    receiver: mpsc::UnboundedReceiver<PieceStateChange>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl PieceSubscription {
    /// Wraps a receiver with the hook that unregisters its sender.
    pub fn new(
        receiver: mpsc::UnboundedReceiver<PieceStateChange>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            receiver,
            release: Some(Box::new(release)),
        }
    }

    /// Next change, or `None` once the engine dropped the sending side.
    pub async fn recv(&mut self) -> Option<PieceStateChange> {
        self.receiver.recv().await
    }
}

impl Drop for PieceSubscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for PieceSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PieceSubscription")
            .field("released", &self.release.is_none())
            .finish()
    }
}
