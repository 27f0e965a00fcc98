//! Torrent descriptor and magnet link parsing.
//!
//! Metadata extraction using bencode-rs and magnet-url. Supports .torrent
//! descriptors (as bytes or from disk) and magnet links.

pub mod bencode;
pub mod magnet;
pub mod parser;
pub mod types;

// Re-export public API
pub use parser::BencodeTorrentParser;
pub use types::{MagnetLink, TorrentFile, TorrentMetadata, TorrentParser};
