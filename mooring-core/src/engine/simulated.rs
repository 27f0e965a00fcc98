//! In-process transfer engine for development and tests
//!
//! Transfers never touch the network. Descriptor admissions know their
//! metadata immediately, magnet admissions resolve after a configurable delay
//! (or when a test calls [`SimulatedEngine::resolve_metadata`]), and pieces
//! complete on a timer once full download starts (or through the explicit
//! completion hooks).

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sha1::{Digest, Sha1};
use tokio::sync::{mpsc, watch};

use super::{
    Admitted, PieceStateChange, PieceSubscription, SharedTransfer, TransferEngine, TransferHandle,
};
use crate::config::SimulationConfig;
use crate::torrent::{
    BencodeTorrentParser, InfoHash, MagnetLink, PieceIndex, TorrentError, TorrentMetadata,
    TorrentParser, build_descriptor, build_single_file_info,
};

/// Transfer engine simulating metadata resolution and piece progress.
///
/// Cheap to clone; clones share the same set of transfers.
#[derive(Clone)]
pub struct SimulatedEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: SimulationConfig,
    parser: BencodeTorrentParser,
    transfers: Mutex<HashMap<InfoHash, Arc<SimulatedTransfer>>>,
}

impl SimulatedEngine {
    /// Creates an engine with no transfers.
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                parser: BencodeTorrentParser::new(),
                transfers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Concrete transfer for test inspection.
    pub fn simulated(&self, info_hash: InfoHash) -> Option<Arc<SimulatedTransfer>> {
        self.inner.transfers.lock().get(&info_hash).cloned()
    }

    /// Delivers metadata to a magnet transfer immediately.
    ///
    /// Returns false when the transfer already had metadata.
    ///
    /// # Errors
    /// - `TorrentError::TorrentNotFound` - Engine does not hold the transfer
    pub fn resolve_metadata(&self, info_hash: InfoHash) -> Result<bool, TorrentError> {
        let transfer = self.require(info_hash)?;
        Ok(transfer.resolve(
            self.inner.config.magnet_piece_count,
            self.inner.config.magnet_piece_length,
        ))
    }

    /// Marks one piece complete and publishes the change.
    ///
    /// Returns false when the piece was already complete or out of range.
    ///
    /// # Errors
    /// - `TorrentError::TorrentNotFound` - Engine does not hold the transfer
    pub fn complete_piece(
        &self,
        info_hash: InfoHash,
        index: PieceIndex,
    ) -> Result<bool, TorrentError> {
        Ok(self.require(info_hash)?.mark_piece_complete(index))
    }

    /// Marks every remaining piece complete, publishing each change.
    ///
    /// # Errors
    /// - `TorrentError::TorrentNotFound` - Engine does not hold the transfer
    pub fn complete_all(&self, info_hash: InfoHash) -> Result<(), TorrentError> {
        let transfer = self.require(info_hash)?;
        for index in 0..transfer.piece_count() {
            transfer.mark_piece_complete(PieceIndex::new(index));
        }
        Ok(())
    }

    /// Replaces the display name, as an engine does when metadata renames a transfer.
    ///
    /// # Errors
    /// - `TorrentError::TorrentNotFound` - Engine does not hold the transfer
    pub fn rename(&self, info_hash: InfoHash, name: &str) -> Result<(), TorrentError> {
        self.require(info_hash)?.state.lock().name = name.to_string();
        Ok(())
    }

    fn require(&self, info_hash: InfoHash) -> Result<Arc<SimulatedTransfer>, TorrentError> {
        self.simulated(info_hash)
            .ok_or(TorrentError::TorrentNotFound { info_hash })
    }

    /// Registers a transfer unless a live one with the same hash exists.
    fn insert(&self, transfer: Arc<SimulatedTransfer>) -> (Arc<SimulatedTransfer>, bool) {
        let mut transfers = self.inner.transfers.lock();

        if let Some(existing) = transfers.get(&transfer.info_hash)
            && !existing.is_closed()
        {
            return (Arc::clone(existing), false);
        }

        transfers.insert(transfer.info_hash, Arc::clone(&transfer));
        (transfer, true)
    }

    fn admitted(transfer: Arc<SimulatedTransfer>, is_new: bool) -> Admitted {
        Admitted {
            handle: transfer,
            is_new,
        }
    }

    fn admit_metadata(&self, metadata: TorrentMetadata, descriptor: Vec<u8>) -> Admitted {
        let transfer = SimulatedTransfer::with_metadata(
            Arc::downgrade(&self.inner),
            self.inner.config.piece_interval,
            metadata,
            descriptor,
        );
        let (transfer, is_new) = self.insert(transfer);

        tracing::debug!(
            info_hash = %transfer.info_hash,
            name = %transfer.name(),
            is_new,
            "Simulated descriptor admission"
        );
        Self::admitted(transfer, is_new)
    }
}

#[async_trait]
impl TransferEngine for SimulatedEngine {
    async fn admit_descriptor(&self, descriptor: Vec<u8>) -> Result<Admitted, TorrentError> {
        let metadata = self.inner.parser.parse_torrent_data(&descriptor).await?;
        Ok(self.admit_metadata(metadata, descriptor))
    }

    async fn admit_magnet(&self, uri: &str) -> Result<Admitted, TorrentError> {
        let magnet = self.inner.parser.parse_magnet_link(uri).await?;
        let transfer = SimulatedTransfer::pending(
            Arc::downgrade(&self.inner),
            self.inner.config.piece_interval,
            magnet,
        );
        let (transfer, is_new) = self.insert(transfer);

        if is_new && let Some(delay) = self.inner.config.magnet_resolve_delay {
            let pending = Arc::downgrade(&transfer);
            let piece_count = self.inner.config.magnet_piece_count;
            let piece_length = self.inner.config.magnet_piece_length;

            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(transfer) = pending.upgrade()
                    && !transfer.is_closed()
                {
                    transfer.resolve(piece_count, piece_length);
                }
            });
        }

        tracing::debug!(
            info_hash = %transfer.info_hash,
            is_new,
            "Simulated magnet admission"
        );
        Ok(Self::admitted(transfer, is_new))
    }

    async fn admit_path(&self, path: &Path) -> Result<Admitted, TorrentError> {
        let descriptor = tokio::fs::read(path).await?;
        self.admit_descriptor(descriptor).await
    }

    fn transfers(&self) -> Vec<SharedTransfer> {
        self.inner
            .transfers
            .lock()
            .values()
            .map(|transfer| Arc::clone(transfer) as SharedTransfer)
            .collect()
    }

    fn transfer(&self, info_hash: InfoHash) -> Option<SharedTransfer> {
        self.simulated(info_hash)
            .map(|transfer| transfer as SharedTransfer)
    }
}

/// Transfer held by a [`SimulatedEngine`].
pub struct SimulatedTransfer {
    info_hash: InfoHash,
    engine: Weak<EngineInner>,
    self_ref: Weak<SimulatedTransfer>,
    piece_interval: Option<Duration>,
    state: Mutex<TransferState>,
    metadata_ready: watch::Sender<bool>,
    closed: watch::Sender<bool>,
    subscribers: Mutex<HashMap<u64, mpsc::UnboundedSender<PieceStateChange>>>,
    next_subscriber: AtomicU64,
    downloading: AtomicBool,
}

struct TransferState {
    name: String,
    trackers: Vec<String>,
    metadata: Option<KnownMetadata>,
    pieces: Vec<bool>,
}

struct KnownMetadata {
    total_size: u64,
    descriptor: Vec<u8>,
}

impl SimulatedTransfer {
    fn with_metadata(
        engine: Weak<EngineInner>,
        piece_interval: Option<Duration>,
        metadata: TorrentMetadata,
        descriptor: Vec<u8>,
    ) -> Arc<Self> {
        let state = TransferState {
            pieces: vec![false; metadata.piece_hashes.len()],
            name: metadata.name,
            trackers: metadata.announce_urls,
            metadata: Some(KnownMetadata {
                total_size: metadata.total_length,
                descriptor,
            }),
        };
        Self::build(engine, piece_interval, metadata.info_hash, state, true)
    }

    fn pending(
        engine: Weak<EngineInner>,
        piece_interval: Option<Duration>,
        magnet: MagnetLink,
    ) -> Arc<Self> {
        let state = TransferState {
            name: magnet.display_name.unwrap_or_default(),
            trackers: magnet.trackers,
            metadata: None,
            pieces: Vec::new(),
        };
        Self::build(engine, piece_interval, magnet.info_hash, state, false)
    }

    fn build(
        engine: Weak<EngineInner>,
        piece_interval: Option<Duration>,
        info_hash: InfoHash,
        state: TransferState,
        has_metadata: bool,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            info_hash,
            engine,
            self_ref: self_ref.clone(),
            piece_interval,
            state: Mutex::new(state),
            metadata_ready: watch::Sender::new(has_metadata),
            closed: watch::Sender::new(false),
            subscribers: Mutex::new(HashMap::new()),
            next_subscriber: AtomicU64::new(0),
            downloading: AtomicBool::new(false),
        })
    }

    /// Synthesizes a single-file info dictionary for a magnet transfer.
    ///
    /// The synthesized dictionary does not hash to the magnet's info hash;
    /// the transfer keeps the hash it was admitted under.
    fn resolve(&self, piece_count: u32, piece_length: u32) -> bool {
        {
            let mut state = self.state.lock();
            if state.metadata.is_some() {
                return false;
            }

            let piece_hashes: Vec<[u8; 20]> = (0..piece_count)
                .map(|index| synthetic_piece_hash(self.info_hash, index))
                .collect();
            let total_size = u64::from(piece_count) * u64::from(piece_length);
            let info = build_single_file_info(&state.name, total_size, piece_length, &piece_hashes);

            state.pieces = vec![false; piece_hashes.len()];
            state.metadata = Some(KnownMetadata {
                total_size,
                descriptor: build_descriptor(&info, &state.trackers),
            });
        }

        tracing::debug!(info_hash = %self.info_hash, "Simulated metadata resolved");
        self.metadata_ready.send_replace(true);
        true
    }

    /// Marks a piece complete and notifies subscribers.
    ///
    /// State is updated before publishing, so a subscriber registered before
    /// taking a snapshot observes every completion either way.
    pub fn mark_piece_complete(&self, index: PieceIndex) -> bool {
        {
            let mut state = self.state.lock();
            match state.pieces.get_mut(index.as_u32() as usize) {
                Some(piece) if !*piece => *piece = true,
                _ => return false,
            }
        }

        let change = PieceStateChange {
            index,
            complete: true,
        };
        self.subscribers
            .lock()
            .retain(|_, sender| sender.send(change).is_ok());
        true
    }

    /// Number of live piece change subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Whether full download was requested.
    pub fn is_downloading(&self) -> bool {
        self.downloading.load(Ordering::SeqCst)
    }

    async fn drive_pieces(self: Arc<Self>, interval: Duration) {
        let mut closed = self.closed.subscribe();

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = closed.wait_for(|closed| *closed) => break,
            }

            let next = self.state.lock().pieces.iter().position(|done| !done);
            let Some(next) = next else {
                break;
            };
            self.mark_piece_complete(PieceIndex::new(
                u32::try_from(next).unwrap_or(u32::MAX),
            ));
        }

        tracing::trace!(info_hash = %self.info_hash, "Simulated piece driver finished");
    }
}

fn synthetic_piece_hash(info_hash: InfoHash, index: u32) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(info_hash.as_bytes());
    hasher.update(index.to_be_bytes());

    let mut hash = [0u8; 20];
    hash.copy_from_slice(&hasher.finalize());
    hash
}

#[async_trait]
impl TransferHandle for SimulatedTransfer {
    fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    fn name(&self) -> String {
        self.state.lock().name.clone()
    }

    fn total_size(&self) -> u64 {
        self.state
            .lock()
            .metadata
            .as_ref()
            .map_or(0, |metadata| metadata.total_size)
    }

    fn piece_count(&self) -> u32 {
        u32::try_from(self.state.lock().pieces.len()).unwrap_or(u32::MAX)
    }

    fn has_metadata(&self) -> bool {
        *self.metadata_ready.borrow()
    }

    async fn metadata_ready(&self) {
        let mut ready = self.metadata_ready.subscribe();
        let _ = ready.wait_for(|ready| *ready).await;
    }

    async fn closed(&self) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn piece_complete(&self, index: PieceIndex) -> bool {
        self.state
            .lock()
            .pieces
            .get(index.as_u32() as usize)
            .copied()
            .unwrap_or(false)
    }

    fn completed_pieces(&self) -> u32 {
        let completed = self.state.lock().pieces.iter().filter(|done| **done).count();
        u32::try_from(completed).unwrap_or(u32::MAX)
    }

    fn subscribe_piece_changes(&self) -> PieceSubscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);

        // A closed transfer drops the sender so the subscription ends at once
        if !self.is_closed() {
            self.subscribers.lock().insert(id, sender);
        }

        let transfer = self.self_ref.clone();
        PieceSubscription::new(receiver, move || {
            if let Some(transfer) = transfer.upgrade() {
                transfer.subscribers.lock().remove(&id);
            }
        })
    }

    fn start_full_download(&self) {
        if self.is_closed() || self.downloading.swap(true, Ordering::SeqCst) {
            return;
        }

        let Some(interval) = self.piece_interval else {
            return;
        };
        let Some(transfer) = self.self_ref.upgrade() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(transfer.drive_pieces(interval));
            }
            Err(e) => {
                tracing::warn!(info_hash = %self.info_hash, error = %e, "No runtime for piece driver");
            }
        }
    }

    fn detach(&self) {
        if let Some(engine) = self.engine.upgrade() {
            let mut transfers = engine.transfers.lock();
            if transfers
                .get(&self.info_hash)
                .is_some_and(|held| std::ptr::eq(Arc::as_ptr(held), self))
            {
                transfers.remove(&self.info_hash);
            }
        }

        self.closed.send_replace(true);
        self.subscribers.lock().clear();
        tracing::debug!(info_hash = %self.info_hash, "Simulated transfer detached");
    }

    fn serialized_descriptor(&self) -> Result<Vec<u8>, TorrentError> {
        self.state
            .lock()
            .metadata
            .as_ref()
            .map(|metadata| metadata.descriptor.clone())
            .ok_or(TorrentError::DescriptorUnavailable {
                info_hash: self.info_hash,
            })
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::test_support::descriptor;
    use super::*;

    const MAGNET: &str = "magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567&dn=Big+Buck+Bunny&tr=http%3A%2F%2Ftracker.example.com%2Fannounce";

    fn manual_engine() -> SimulatedEngine {
        SimulatedEngine::new(SimulationConfig::manual())
    }

    #[tokio::test]
    async fn test_descriptor_admission_has_metadata() {
        let engine = manual_engine();
        let bytes = descriptor("movie.mkv", 3);

        let admitted = engine.admit_descriptor(bytes.clone()).await.unwrap();
        let handle = admitted.handle;

        assert!(admitted.is_new);
        assert!(handle.has_metadata());
        assert_eq!(handle.name(), "movie.mkv");
        assert_eq!(handle.piece_count(), 3);
        assert_eq!(handle.total_size(), 3 * 16_384);
        assert_eq!(handle.completed_pieces(), 0);
        assert_eq!(handle.serialized_descriptor().unwrap(), bytes);
        timeout(Duration::from_secs(1), handle.metadata_ready())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_admission_returns_existing_handle() {
        let engine = manual_engine();

        let first = engine.admit_descriptor(descriptor("dup", 2)).await.unwrap();
        let second = engine.admit_descriptor(descriptor("dup", 2)).await.unwrap();

        assert!(first.is_new);
        assert!(!second.is_new);
        assert!(Arc::ptr_eq(&first.handle, &second.handle));
        assert_eq!(engine.transfers().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_admissions() {
        let engine = manual_engine();

        let result = engine.admit_descriptor(b"garbage".to_vec()).await;
        assert!(matches!(
            result,
            Err(TorrentError::InvalidTorrentFile { .. })
        ));

        let result = engine.admit_magnet("magnet:?dn=no-hash").await;
        assert!(matches!(
            result,
            Err(TorrentError::InvalidMagnetLink { .. })
        ));

        let result = engine.admit_path(Path::new("/nonexistent/x.torrent")).await;
        assert!(matches!(result, Err(TorrentError::Io(_))));
    }

    #[tokio::test]
    async fn test_magnet_resolves_through_hook() {
        let engine = manual_engine();
        let admitted = engine.admit_magnet(MAGNET).await.unwrap();
        let handle = admitted.handle;
        let info_hash = handle.info_hash();

        assert!(!handle.has_metadata());
        assert_eq!(handle.name(), "Big Buck Bunny");
        assert_eq!(handle.piece_count(), 0);
        assert!(matches!(
            handle.serialized_descriptor(),
            Err(TorrentError::DescriptorUnavailable { .. })
        ));

        assert!(engine.resolve_metadata(info_hash).unwrap());
        assert!(!engine.resolve_metadata(info_hash).unwrap());

        timeout(Duration::from_secs(1), handle.metadata_ready())
            .await
            .unwrap();
        assert_eq!(handle.piece_count(), SimulationConfig::manual().magnet_piece_count);

        let descriptor = handle.serialized_descriptor().unwrap();
        let metadata = BencodeTorrentParser::new()
            .parse_torrent_data(&descriptor)
            .await
            .unwrap();
        assert_eq!(metadata.name, "Big Buck Bunny");
        assert_eq!(
            metadata.announce_urls,
            vec!["http://tracker.example.com/announce"]
        );
    }

    #[tokio::test]
    async fn test_magnet_resolves_after_delay() {
        let config = SimulationConfig {
            magnet_resolve_delay: Some(Duration::from_millis(10)),
            ..SimulationConfig::manual()
        };
        let engine = SimulatedEngine::new(config);
        let handle = engine.admit_magnet(MAGNET).await.unwrap().handle;

        timeout(Duration::from_secs(2), handle.metadata_ready())
            .await
            .unwrap();
        assert!(handle.has_metadata());
    }

    #[tokio::test]
    async fn test_piece_changes_reach_subscribers() {
        let engine = manual_engine();
        let handle = engine.admit_descriptor(descriptor("pieces", 3)).await.unwrap().handle;
        let info_hash = handle.info_hash();
        let simulated = engine.simulated(info_hash).unwrap();

        let mut subscription = handle.subscribe_piece_changes();
        assert_eq!(simulated.subscriber_count(), 1);

        assert!(engine.complete_piece(info_hash, PieceIndex::new(1)).unwrap());
        assert!(!engine.complete_piece(info_hash, PieceIndex::new(1)).unwrap());
        assert!(!engine.complete_piece(info_hash, PieceIndex::new(9)).unwrap());

        let change = subscription.recv().await.unwrap();
        assert_eq!(change.index, PieceIndex::new(1));
        assert!(change.complete);
        assert!(handle.piece_complete(PieceIndex::new(1)));
        assert!(!handle.piece_complete(PieceIndex::new(0)));
        assert_eq!(handle.completed_pieces(), 1);

        drop(subscription);
        assert_eq!(simulated.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_detach_closes_and_releases() {
        let engine = manual_engine();
        let handle = engine.admit_descriptor(descriptor("gone", 2)).await.unwrap().handle;
        let info_hash = handle.info_hash();

        let mut subscription = handle.subscribe_piece_changes();
        handle.detach();

        assert!(handle.is_closed());
        assert!(engine.transfer(info_hash).is_none());
        assert!(matches!(
            engine.complete_all(info_hash),
            Err(TorrentError::TorrentNotFound { .. })
        ));
        assert_eq!(subscription.recv().await, None);
        timeout(Duration::from_secs(1), handle.closed())
            .await
            .unwrap();

        // Re-admission after detach creates a fresh transfer
        let again = engine.admit_descriptor(descriptor("gone", 2)).await.unwrap();
        assert!(again.is_new);
        assert!(!again.handle.is_closed());
    }

    #[tokio::test]
    async fn test_piece_driver_completes_transfer() {
        let config = SimulationConfig {
            piece_interval: Some(Duration::from_millis(2)),
            ..SimulationConfig::manual()
        };
        let engine = SimulatedEngine::new(config);
        let handle = engine.admit_descriptor(descriptor("driven", 4)).await.unwrap().handle;
        let simulated = engine.simulated(handle.info_hash()).unwrap();

        handle.start_full_download();
        assert!(simulated.is_downloading());

        timeout(Duration::from_secs(5), async {
            while handle.completed_pieces() < 4 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
    }
}
