//! Per-transfer completion watcher
//!
//! One watcher runs for every newly admitted transfer. It reports metadata
//! arrival and full completion to the event loop and exits on the first
//! terminal event: completion, external close or shutdown.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::shutdown::ShutdownSignal;
use crate::engine::{PieceStateChange, SharedTransfer, TransferHandle};
use crate::torrent::PieceIndex;

/// How a watcher ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WatchOutcome {
    /// Every piece completed and the loop was told
    Completed,
    /// Transfer was closed from outside before completing
    Closed,
    /// Shutdown fired, or the loop went away, first
    Shutdown,
}

/// Piece indices not yet complete for one transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct PendingPieces {
    pending: BTreeSet<u32>,
}

impl PendingPieces {
    /// Builds the set from a completion snapshot of `[0, piece_count)`.
    pub(crate) fn from_completion(
        piece_count: u32,
        is_complete: impl Fn(PieceIndex) -> bool,
    ) -> Self {
        Self {
            pending: (0..piece_count)
                .filter(|&index| !is_complete(PieceIndex::new(index)))
                .collect(),
        }
    }

    pub(crate) fn snapshot(transfer: &dyn TransferHandle) -> Self {
        Self::from_completion(transfer.piece_count(), |index| {
            transfer.piece_complete(index)
        })
    }

    /// Applies a state change. Only completions shrink the set.
    pub(crate) fn apply(&mut self, change: PieceStateChange) -> bool {
        change.complete && self.pending.remove(&change.index.as_u32())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}

/// Watches one transfer from admission to completion.
pub(crate) struct CompletionWatcher {
    transfer: SharedTransfer,
    metadata_ready: mpsc::Sender<SharedTransfer>,
    completed: mpsc::Sender<SharedTransfer>,
    shutdown: ShutdownSignal,
}

impl CompletionWatcher {
    pub(crate) fn new(
        transfer: SharedTransfer,
        metadata_ready: mpsc::Sender<SharedTransfer>,
        completed: mpsc::Sender<SharedTransfer>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            transfer,
            metadata_ready,
            completed,
            shutdown,
        }
    }

    /// Runs the watcher to its terminal event.
    ///
    /// Shutdown takes precedence over every other ready event, and an external
    /// close takes precedence over progress.
    pub(crate) async fn run(self) -> WatchOutcome {
        let info_hash = self.transfer.info_hash();

        tokio::select! {
            biased;
            () = self.shutdown.wait() => return WatchOutcome::Shutdown,
            () = self.transfer.closed() => return WatchOutcome::Closed,
            () = self.transfer.metadata_ready() => {}
        }

        tracing::debug!(%info_hash, name = %self.transfer.name(), "Metadata ready");
        if !self.post(&self.metadata_ready).await {
            return WatchOutcome::Shutdown;
        }

        // Subscribe before the snapshot so no completion falls between them
        let mut subscription = self.transfer.subscribe_piece_changes();
        let mut pending = PendingPieces::snapshot(&*self.transfer);
        tracing::trace!(%info_hash, pending = pending.len(), "Waiting for pieces");

        while !pending.is_empty() {
            tokio::select! {
                biased;
                () = self.shutdown.wait() => return WatchOutcome::Shutdown,
                () = self.transfer.closed() => return WatchOutcome::Closed,
                change = subscription.recv() => match change {
                    Some(change) => {
                        pending.apply(change);
                    }
                    None => return WatchOutcome::Closed,
                },
            }
        }
        drop(subscription);

        if self.post(&self.completed).await {
            WatchOutcome::Completed
        } else {
            WatchOutcome::Shutdown
        }
    }

    /// Hands the transfer to the loop unless shutdown wins the race.
    async fn post(&self, channel: &mpsc::Sender<SharedTransfer>) -> bool {
        if self.shutdown.is_triggered() {
            return false;
        }

        tokio::select! {
            biased;
            () = self.shutdown.wait() => false,
            sent = channel.send(Arc::clone(&self.transfer)) => sent.is_ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use proptest::prelude::*;
    use tokio::time::timeout;

    use super::*;
    use crate::config::SimulationConfig;
    use crate::engine::simulated::test_support::descriptor;
    use crate::engine::{SimulatedEngine, TransferEngine};
    use crate::lifecycle::shutdown::{ShutdownTrigger, shutdown_channel};

    const WAIT: Duration = Duration::from_secs(2);

    struct Harness {
        engine: SimulatedEngine,
        metadata_rx: mpsc::Receiver<SharedTransfer>,
        completed_rx: mpsc::Receiver<SharedTransfer>,
        watcher: CompletionWatcher,
        trigger: ShutdownTrigger,
    }

    async fn harness(descriptor_bytes: Vec<u8>) -> Harness {
        let engine = SimulatedEngine::new(SimulationConfig::manual());
        let transfer = engine.admit_descriptor(descriptor_bytes).await.unwrap().handle;
        let (metadata_tx, metadata_rx) = mpsc::channel(1);
        let (completed_tx, completed_rx) = mpsc::channel(1);
        let (trigger, signal) = shutdown_channel();

        Harness {
            engine,
            metadata_rx,
            completed_rx,
            watcher: CompletionWatcher::new(transfer, metadata_tx, completed_tx, signal),
            trigger,
        }
    }

    fn change(index: u32, complete: bool) -> PieceStateChange {
        PieceStateChange {
            index: PieceIndex::new(index),
            complete,
        }
    }

    #[test]
    fn test_pending_set_from_snapshot() {
        let complete = [0u32, 2, 4];
        let mut pending =
            PendingPieces::from_completion(5, |index| complete.contains(&index.as_u32()));
        assert_eq!(pending.len(), 2);

        assert!(pending.apply(change(1, true)));
        assert!(!pending.is_empty());
        assert!(pending.apply(change(3, true)));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_pending_set_ignores_incomplete_and_unknown() {
        let mut pending = PendingPieces::from_completion(2, |_| false);

        assert!(!pending.apply(change(0, false)));
        assert!(!pending.apply(change(7, true)));
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn test_zero_pieces_is_immediately_empty() {
        assert!(PendingPieces::from_completion(0, |_| false).is_empty());
    }

    proptest! {
        #[test]
        fn pending_set_tracks_incomplete_pieces(
            initial in prop::collection::vec(any::<bool>(), 0..64),
            events in prop::collection::vec((0u32..80, any::<bool>()), 0..128),
        ) {
            let piece_count = initial.len() as u32;
            let mut pending =
                PendingPieces::from_completion(piece_count, |index| initial[index.as_u32() as usize]);
            let mut expected: BTreeSet<u32> =
                (0..piece_count).filter(|&i| !initial[i as usize]).collect();

            for (index, complete) in events {
                let removed = pending.apply(change(index, complete));
                let expected_removed = complete && expected.remove(&index);
                prop_assert_eq!(removed, expected_removed);
                prop_assert_eq!(pending.len(), expected.len());
                prop_assert_eq!(pending.is_empty(), expected.is_empty());
            }
        }
    }

    #[tokio::test]
    async fn test_watcher_reports_metadata_then_completion() {
        let mut harness = harness(descriptor("watched", 3)).await;
        let info_hash = harness.watcher.transfer.info_hash();
        let simulated = harness.engine.simulated(info_hash).unwrap();
        harness
            .engine
            .complete_piece(info_hash, PieceIndex::new(0))
            .unwrap();

        let task = tokio::spawn(harness.watcher.run());

        let posted = timeout(WAIT, harness.metadata_rx.recv()).await.unwrap().unwrap();
        assert_eq!(posted.info_hash(), info_hash);

        // Wait for the subscription so the remaining completions are observed live
        timeout(WAIT, async {
            while simulated.subscriber_count() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        harness.engine.complete_all(info_hash).unwrap();

        let completed = timeout(WAIT, harness.completed_rx.recv()).await.unwrap().unwrap();
        assert_eq!(completed.info_hash(), info_hash);
        assert_eq!(timeout(WAIT, task).await.unwrap().unwrap(), WatchOutcome::Completed);
        assert_eq!(simulated.subscriber_count(), 0);
        assert!(harness.completed_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_watcher_posts_once_after_last_pending_piece() {
        let mut harness = harness(descriptor("sparse", 5)).await;
        let info_hash = harness.watcher.transfer.info_hash();
        let simulated = harness.engine.simulated(info_hash).unwrap();
        for index in [0, 2, 4] {
            harness
                .engine
                .complete_piece(info_hash, PieceIndex::new(index))
                .unwrap();
        }

        let task = tokio::spawn(harness.watcher.run());
        timeout(WAIT, harness.metadata_rx.recv()).await.unwrap().unwrap();
        timeout(WAIT, async {
            while simulated.subscriber_count() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        harness
            .engine
            .complete_piece(info_hash, PieceIndex::new(1))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(harness.completed_rx.try_recv().is_err());
        assert!(!task.is_finished());

        harness
            .engine
            .complete_piece(info_hash, PieceIndex::new(3))
            .unwrap();

        let completed = timeout(WAIT, harness.completed_rx.recv()).await.unwrap().unwrap();
        assert_eq!(completed.info_hash(), info_hash);
        assert_eq!(timeout(WAIT, task).await.unwrap().unwrap(), WatchOutcome::Completed);
        assert!(harness.completed_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_watcher_completes_without_pieces() {
        let mut harness = harness(descriptor("empty", 0)).await;

        let task = tokio::spawn(harness.watcher.run());

        timeout(WAIT, harness.metadata_rx.recv()).await.unwrap().unwrap();
        timeout(WAIT, harness.completed_rx.recv()).await.unwrap().unwrap();
        assert_eq!(timeout(WAIT, task).await.unwrap().unwrap(), WatchOutcome::Completed);
    }

    #[tokio::test]
    async fn test_watcher_exits_on_external_close() {
        let mut harness = harness(descriptor("closing", 2)).await;
        let transfer = Arc::clone(&harness.watcher.transfer);
        let simulated = harness.engine.simulated(transfer.info_hash()).unwrap();

        let task = tokio::spawn(harness.watcher.run());
        timeout(WAIT, harness.metadata_rx.recv()).await.unwrap().unwrap();

        transfer.close();

        assert_eq!(timeout(WAIT, task).await.unwrap().unwrap(), WatchOutcome::Closed);
        assert_eq!(simulated.subscriber_count(), 0);
        assert!(harness.completed_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_watcher_exits_on_shutdown_before_metadata() {
        let engine = SimulatedEngine::new(SimulationConfig::manual());
        let transfer = engine
            .admit_magnet("magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567")
            .await
            .unwrap()
            .handle;
        let (metadata_tx, mut metadata_rx) = mpsc::channel(1);
        let (completed_tx, _completed_rx) = mpsc::channel(1);
        let (trigger, signal) = shutdown_channel();

        let watcher = CompletionWatcher::new(transfer, metadata_tx, completed_tx, signal);
        let task = tokio::spawn(watcher.run());

        trigger.trigger();

        assert_eq!(timeout(WAIT, task).await.unwrap().unwrap(), WatchOutcome::Shutdown);
        assert!(metadata_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_watcher_exits_on_shutdown_while_waiting_for_pieces() {
        let mut harness = harness(descriptor("stalled", 2)).await;
        let info_hash = harness.watcher.transfer.info_hash();

        let task = tokio::spawn(harness.watcher.run());
        timeout(WAIT, harness.metadata_rx.recv()).await.unwrap().unwrap();

        harness.trigger.trigger();
        // Completions after shutdown must not reach the loop
        let _ = harness.engine.complete_all(info_hash);

        assert_eq!(timeout(WAIT, task).await.unwrap().unwrap(), WatchOutcome::Shutdown);
        assert!(harness.completed_rx.try_recv().is_err());
    }
}
