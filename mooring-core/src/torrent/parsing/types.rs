//! Core types and structures for torrent parsing

use std::path::Path;

use async_trait::async_trait;

use super::super::{InfoHash, TorrentError};

/// Complete metadata extracted from a torrent descriptor.
///
/// Keeps the raw bencoded info dictionary alongside the decoded fields so the
/// descriptor can be re-emitted byte-for-byte compatible with its info hash.
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentMetadata {
    pub info_hash: InfoHash,
    pub name: String,
    pub piece_length: u32,
    pub piece_hashes: Vec<[u8; 20]>,
    pub total_length: u64,
    pub files: Vec<TorrentFile>,
    pub announce_urls: Vec<String>,
    pub info_bytes: Vec<u8>,
}

impl TorrentMetadata {
    /// Number of pieces described by the info dictionary.
    pub fn piece_count(&self) -> u32 {
        u32::try_from(self.piece_hashes.len()).unwrap_or(u32::MAX)
    }
}

/// Individual file within a torrent.
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentFile {
    pub path: Vec<String>,
    pub length: u64,
}

/// Magnet link components.
///
/// Contains info hash and optional display name and tracker URLs, all
/// percent-decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct MagnetLink {
    pub info_hash: InfoHash,
    pub display_name: Option<String>,
    pub trackers: Vec<String>,
}

/// Abstract torrent parsing interface.
#[async_trait]
pub trait TorrentParser: Send + Sync {
    /// Parses torrent metadata from raw bencode bytes.
    ///
    /// # Errors
    /// - `TorrentError::InvalidTorrentFile` - Malformed bencode or missing fields
    async fn parse_torrent_data(&self, data: &[u8]) -> Result<TorrentMetadata, TorrentError>;

    /// Parses torrent file from filesystem path.
    ///
    /// # Errors
    /// - `TorrentError::Io` - File could not be read
    /// - `TorrentError::InvalidTorrentFile` - Parsing failure
    async fn parse_torrent_file(&self, path: &Path) -> Result<TorrentMetadata, TorrentError>;

    /// Parses magnet link to extract torrent information.
    ///
    /// # Errors
    /// - `TorrentError::InvalidMagnetLink` - Malformed magnet URI
    async fn parse_magnet_link(&self, magnet_url: &str) -> Result<MagnetLink, TorrentError>;
}
