//! Point-in-time transfer snapshots for polling consumers

use serde::Serialize;

use crate::engine::TransferHandle;
use crate::torrent::InfoHash;

/// Snapshot of one transfer as seen by the engine.
///
/// Consumers poll these on their own cadence; building one reads the handle
/// and nothing else.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferStatus {
    pub info_hash: InfoHash,
    pub name: String,
    pub total_size: u64,
    pub piece_count: u32,
    pub completed_pieces: u32,
    /// Fraction of pieces complete, in `[0.0, 1.0]`
    pub progress: f64,
    pub has_metadata: bool,
    pub is_complete: bool,
    pub is_closed: bool,
}

impl TransferStatus {
    pub fn from_handle(transfer: &dyn TransferHandle) -> Self {
        let has_metadata = transfer.has_metadata();
        let piece_count = transfer.piece_count();
        let completed_pieces = transfer.completed_pieces().min(piece_count);

        let progress = match (has_metadata, piece_count) {
            (false, _) => 0.0,
            (true, 0) => 1.0,
            (true, total) => f64::from(completed_pieces) / f64::from(total),
        };

        Self {
            info_hash: transfer.info_hash(),
            name: transfer.name(),
            total_size: transfer.total_size(),
            piece_count,
            completed_pieces,
            progress,
            has_metadata,
            is_complete: has_metadata && completed_pieces == piece_count,
            is_closed: transfer.is_closed(),
        }
    }

    /// Name for display, falling back to the hex info hash.
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            self.info_hash.to_hex()
        } else {
            self.name.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::engine::simulated::test_support::descriptor;
    use crate::engine::{SimulatedEngine, TransferEngine};
    use crate::torrent::PieceIndex;

    #[tokio::test]
    async fn test_status_progress() {
        let engine = SimulatedEngine::new(SimulationConfig::manual());
        let handle = engine.admit_descriptor(descriptor("half", 4)).await.unwrap().handle;
        engine
            .complete_piece(handle.info_hash(), PieceIndex::new(0))
            .unwrap();
        engine
            .complete_piece(handle.info_hash(), PieceIndex::new(3))
            .unwrap();

        let status = TransferStatus::from_handle(handle.as_ref());
        assert_eq!(status.name, "half");
        assert_eq!(status.piece_count, 4);
        assert_eq!(status.completed_pieces, 2);
        assert!((status.progress - 0.5).abs() < f64::EPSILON);
        assert!(!status.is_complete);
        assert!(!status.is_closed);
    }

    #[tokio::test]
    async fn test_status_before_metadata() {
        let engine = SimulatedEngine::new(SimulationConfig::manual());
        let handle = engine
            .admit_magnet("magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567")
            .await
            .unwrap()
            .handle;

        let status = TransferStatus::from_handle(handle.as_ref());
        assert!(!status.has_metadata);
        assert_eq!(status.progress, 0.0);
        assert!(!status.is_complete);
        assert_eq!(
            status.display_name(),
            "0123456789abcdef0123456789abcdef01234567"
        );
    }

    #[tokio::test]
    async fn test_status_serializes_hash_as_hex() {
        let engine = SimulatedEngine::new(SimulationConfig::manual());
        let handle = engine.admit_descriptor(descriptor("empty", 0)).await.unwrap().handle;

        let status = TransferStatus::from_handle(handle.as_ref());
        assert_eq!(status.progress, 1.0);
        assert!(status.is_complete);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["info_hash"], handle.info_hash().to_hex());
        assert_eq!(json["name"], "empty");
    }
}
