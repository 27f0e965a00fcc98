//! Magnet link parsing utilities

use super::types::MagnetLink;
use crate::torrent::{InfoHash, TorrentError};

const BTIH_PREFIX: &str = "urn:btih:";

/// Magnet link parsing utilities.
pub struct MagnetParser;

impl MagnetParser {
    /// Parses magnet link to extract torrent information.
    ///
    /// # Errors
    /// - `TorrentError::InvalidMagnetLink` - Malformed magnet URI or info hash
    pub fn parse_magnet_link(magnet_url: &str) -> Result<MagnetLink, TorrentError> {
        let magnet =
            magnet_url::Magnet::new(magnet_url).map_err(|e| TorrentError::InvalidMagnetLink {
                reason: format!("{e:?}"),
            })?;

        let info_hash = Self::extract_info_hash(magnet_url)?;

        Ok(MagnetLink {
            info_hash,
            display_name: magnet
                .display_name()
                .map(|name| Self::decode_component(name))
                .filter(|name| !name.is_empty()),
            trackers: magnet
                .trackers()
                .iter()
                .map(|tracker| Self::decode_component(tracker))
                .collect(),
        })
    }

    /// Extract the BitTorrent info hash from the exact topic (`xt`) parameter.
    fn extract_info_hash(magnet_url: &str) -> Result<InfoHash, TorrentError> {
        let query = magnet_url
            .split_once('?')
            .map(|(_, query)| query)
            .unwrap_or_default();

        query
            .split('&')
            .filter_map(|param| param.strip_prefix("xt="))
            .find_map(|topic| topic.strip_prefix(BTIH_PREFIX))
            .ok_or_else(|| TorrentError::InvalidMagnetLink {
                reason: format!("Missing or invalid info hash in magnet link: {magnet_url}"),
            })
            .and_then(InfoHash::from_hex)
    }

    /// Percent-decodes a query component, treating `+` as a space.
    fn decode_component(component: &str) -> String {
        let spaced = component.replace('+', " ");
        urlencoding::decode(&spaced)
            .map(|decoded| decoded.into_owned())
            .unwrap_or(spaced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_component() {
        assert_eq!(MagnetParser::decode_component("Test%20Torrent"), "Test Torrent");
        assert_eq!(
            MagnetParser::decode_component("Wallace+And+Gromit"),
            "Wallace And Gromit"
        );
        assert_eq!(
            MagnetParser::decode_component("http%3A%2F%2Ftracker.example.com%2Fannounce"),
            "http://tracker.example.com/announce"
        );
    }

    #[test]
    fn test_extract_info_hash_from_later_parameter() {
        let uri = "magnet:?dn=Name&xt=urn:btih:0123456789abcdef0123456789abcdef01234567";
        let info_hash = MagnetParser::extract_info_hash(uri).unwrap();
        assert_eq!(
            info_hash.to_hex(),
            "0123456789abcdef0123456789abcdef01234567"
        );
    }

    #[test]
    fn test_extract_info_hash_missing() {
        let result = MagnetParser::extract_info_hash("magnet:?dn=Name");
        assert!(matches!(
            result,
            Err(TorrentError::InvalidMagnetLink { .. })
        ));
    }
}
