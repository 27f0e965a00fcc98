//! Torrent identity, descriptor parsing and descriptor encoding

pub mod creation;
pub mod parsing;

use std::fmt;

use serde::{Serialize, Serializer};

pub use creation::{build_descriptor, build_single_file_info};
pub use parsing::{BencodeTorrentParser, MagnetLink, TorrentFile, TorrentMetadata, TorrentParser};

/// SHA-1 hash identifying a unique torrent.
///
/// 20-byte SHA-1 hash of the info dictionary from a torrent file.
/// Used to uniquely identify transfers across the orchestrator and engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Creates InfoHash from 20-byte SHA-1 hash.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Parses a 40-character hex string into an InfoHash.
    ///
    /// # Errors
    /// - `TorrentError::InvalidMagnetLink` - Wrong length or non-hex characters
    pub fn from_hex(hex_str: &str) -> Result<Self, TorrentError> {
        if hex_str.len() != 40 {
            return Err(TorrentError::InvalidMagnetLink {
                reason: format!("Invalid hash length: {} (expected 40)", hex_str.len()),
            });
        }

        let mut hash = [0u8; 20];
        hex::decode_to_slice(hex_str, &mut hash).map_err(|e| TorrentError::InvalidMagnetLink {
            reason: format!("Invalid hex character in hash {hex_str}: {e}"),
        })?;
        Ok(Self(hash))
    }

    /// Returns reference to underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Lowercase hex rendering used for descriptor file names.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for InfoHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Zero-based index of a piece within a torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PieceIndex(pub u32);

impl PieceIndex {
    /// Creates PieceIndex from zero-based index.
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the underlying piece index as u32.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PieceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors that can occur while admitting or querying transfers.
///
/// Admission failures are surfaced synchronously to the caller; the remaining
/// variants are passed through from the transfer engine unchanged.
#[derive(Debug, thiserror::Error)]
pub enum TorrentError {
    #[error("Failed to parse torrent file: {reason}")]
    InvalidTorrentFile { reason: String },

    #[error("Invalid magnet link: {reason}")]
    InvalidMagnetLink { reason: String },

    #[error("Descriptor for {info_hash} is not available before metadata")]
    DescriptorUnavailable { info_hash: InfoHash },

    #[error("Torrent {info_hash} not found")]
    TorrentNotFound { info_hash: InfoHash },

    #[error("I/O error")]
    Io(#[from] std::io::Error),
}
