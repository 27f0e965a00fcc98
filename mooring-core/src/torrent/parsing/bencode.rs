//! Bencode parsing logic and info hash calculation

use std::ops::Range;

use sha1::{Digest, Sha1};

use super::types::{TorrentFile, TorrentMetadata};
use crate::torrent::{InfoHash, TorrentError};

// Type aliases for complex bencode types
pub(super) type BencodeDict<'a> = std::collections::HashMap<&'a [u8], bencode_rs::Value<'a>>;
pub(super) type ParseResult<T> = Result<T, TorrentError>;
pub(super) type BytesResult<'a> = Result<&'a [u8], TorrentError>;
pub(super) type FilesResult = ParseResult<(Vec<TorrentFile>, u64)>;

fn invalid(reason: impl Into<String>) -> TorrentError {
    TorrentError::InvalidTorrentFile {
        reason: reason.into(),
    }
}

/// Bencode parsing utilities for torrent metadata extraction.
pub struct BencodeParser;

impl BencodeParser {
    /// Parse bencode data and extract torrent metadata
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidTorrentFile` - If bencode parsing or metadata extraction failed
    pub fn parse_bencode_data(torrent_bytes: &[u8]) -> Result<TorrentMetadata, TorrentError> {
        let parsed = bencode_rs::Value::parse(torrent_bytes)
            .map_err(|e| invalid(format!("Bencode parsing failed: {e:?}")))?;

        let Some(root) = parsed.first() else {
            return Err(invalid("Empty bencode data"));
        };

        if let bencode_rs::Value::Dictionary(dict) = root {
            Self::extract_metadata_from_dict(dict, torrent_bytes)
        } else {
            Err(invalid("Root element must be dictionary"))
        }
    }

    /// Extract torrent metadata from bencode dictionary
    fn extract_metadata_from_dict(
        dict: &BencodeDict<'_>,
        original_data: &[u8],
    ) -> ParseResult<TorrentMetadata> {
        let info_dict = dict
            .get(b"info".as_slice())
            .ok_or_else(|| invalid("Missing 'info' field"))?;

        let bencode_rs::Value::Dictionary(info_dict_map) = info_dict else {
            return Err(invalid("Info field must be dictionary"));
        };

        let info_range = Self::locate_info_dictionary(original_data)?;
        let info_bytes = original_data[info_range].to_vec();
        let info_hash = Self::calculate_info_hash(&info_bytes);

        let name = Self::extract_bytes_as_string(info_dict_map, b"name")?;
        let piece_length = u32::try_from(Self::extract_integer(info_dict_map, b"piece length")?)
            .map_err(|_| invalid("Piece length out of range"))?;

        let pieces_bytes = Self::extract_bytes(info_dict_map, b"pieces")?;
        if !pieces_bytes.len().is_multiple_of(20) {
            return Err(invalid("Invalid pieces length"));
        }

        let piece_hashes: Vec<[u8; 20]> = pieces_bytes
            .chunks(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        let (files, total_length) =
            if let Ok(length) = Self::extract_non_negative(info_dict_map, b"length") {
                let files = vec![TorrentFile {
                    path: vec![name.clone()],
                    length,
                }];
                (files, length)
            } else if let Some(bencode_rs::Value::List(files_list)) =
                info_dict_map.get(b"files".as_slice())
            {
                Self::extract_files_info(files_list)?
            } else {
                return Err(invalid("Missing 'files' or 'length' field"));
            };

        let announce_urls = Self::extract_announce_urls(dict);

        Ok(TorrentMetadata {
            info_hash,
            name,
            piece_length,
            piece_hashes,
            total_length,
            files,
            announce_urls,
            info_bytes,
        })
    }

    /// Calculate SHA1 hash of the raw info dictionary bytes
    pub fn calculate_info_hash(info_bytes: &[u8]) -> InfoHash {
        let mut hasher = Sha1::new();
        hasher.update(info_bytes);
        let hash_result = hasher.finalize();
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&hash_result);
        InfoHash::new(hash)
    }

    /// Finds the byte range of the value stored under the top-level `info` key.
    ///
    /// Walks the root dictionary key by key so an `info` substring inside an
    /// announce URL or comment is never mistaken for the key itself.
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidTorrentFile` - If the root is not a well-formed dictionary
    pub fn locate_info_dictionary(data: &[u8]) -> Result<Range<usize>, TorrentError> {
        if data.first() != Some(&b'd') {
            return Err(invalid("Expected dictionary start"));
        }

        let mut pos = 1;
        while pos < data.len() && data[pos] != b'e' {
            let (key, value_start) = Self::read_string(data, pos)?;
            let value_end = value_start + Self::find_value_end(&data[value_start..])?;
            if key == b"info" {
                return Ok(value_start..value_end);
            }
            pos = value_end;
        }

        Err(invalid("Could not find info dictionary in data"))
    }

    /// Reads a length-prefixed byte string starting at `pos`.
    ///
    /// Returns the string contents and the position just past them.
    fn read_string(data: &[u8], pos: usize) -> ParseResult<(&[u8], usize)> {
        let colon = data[pos..]
            .iter()
            .position(|&b| b == b':')
            .map(|offset| pos + offset)
            .ok_or_else(|| invalid("Invalid string format"))?;

        let length: usize = std::str::from_utf8(&data[pos..colon])
            .ok()
            .and_then(|digits| digits.parse().ok())
            .ok_or_else(|| invalid("Invalid string length"))?;

        let start = colon + 1;
        let end = start
            .checked_add(length)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| invalid("String exceeds data length"))?;

        Ok((&data[start..end], end))
    }

    /// Find the end position of the bencode value starting at `data[0]`
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidTorrentFile` - If invalid or truncated bencode
    pub fn find_value_end(data: &[u8]) -> Result<usize, TorrentError> {
        let mut pos = 0;
        let mut depth = 0usize;

        loop {
            match data.get(pos) {
                Some(b'd' | b'l') => {
                    depth += 1;
                    pos += 1;
                }
                Some(b'e') if depth > 0 => {
                    depth -= 1;
                    pos += 1;
                }
                Some(b'i') => {
                    let end = data[pos..]
                        .iter()
                        .position(|&b| b == b'e')
                        .ok_or_else(|| invalid("Unterminated integer"))?;
                    pos += end + 1;
                }
                Some(b'0'..=b'9') => {
                    let (_, next) = Self::read_string(data, pos)?;
                    pos = next;
                }
                Some(_) => return Err(invalid("Invalid bencode character")),
                None => return Err(invalid("Incomplete bencode value")),
            }

            if depth == 0 {
                return Ok(pos);
            }
        }
    }

    /// Extract string from bencode dictionary
    fn extract_bytes_as_string(dict: &BencodeDict<'_>, key: &[u8]) -> ParseResult<String> {
        let bytes = Self::extract_bytes(dict, key)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| {
            invalid(format!(
                "Invalid UTF-8 in field: {:?}",
                String::from_utf8_lossy(key)
            ))
        })
    }

    /// Extract bytes from bencode dictionary
    fn extract_bytes<'a>(dict: &'a BencodeDict<'_>, key: &[u8]) -> BytesResult<'a> {
        match dict.get(key) {
            Some(bencode_rs::Value::Bytes(bytes)) => Ok(bytes),
            _ => Err(invalid(format!(
                "Missing or invalid field: {:?}",
                String::from_utf8_lossy(key)
            ))),
        }
    }

    /// Extract integer from bencode dictionary
    fn extract_integer(dict: &BencodeDict<'_>, key: &[u8]) -> ParseResult<i64> {
        match dict.get(key) {
            Some(bencode_rs::Value::Integer(value)) => Ok(*value),
            _ => Err(invalid(format!(
                "Missing or invalid integer field: {:?}",
                String::from_utf8_lossy(key)
            ))),
        }
    }

    fn extract_non_negative(dict: &BencodeDict<'_>, key: &[u8]) -> ParseResult<u64> {
        let value = Self::extract_integer(dict, key)?;
        u64::try_from(value).map_err(|_| {
            invalid(format!(
                "Negative value in field: {:?}",
                String::from_utf8_lossy(key)
            ))
        })
    }

    /// Extract files information from multi-file torrent
    fn extract_files_info(files_list: &[bencode_rs::Value<'_>]) -> FilesResult {
        let mut files = Vec::new();
        let mut total_length = 0u64;

        for file_value in files_list {
            let bencode_rs::Value::Dictionary(file_dict) = file_value else {
                return Err(invalid("Invalid file entry type"));
            };

            let length = Self::extract_non_negative(file_dict, b"length")?;
            total_length += length;

            let Some(bencode_rs::Value::List(path_list)) = file_dict.get(b"path".as_slice()) else {
                return Err(invalid("Missing or invalid path in file"));
            };

            let mut path = Vec::with_capacity(path_list.len());
            for path_component in path_list {
                let bencode_rs::Value::Bytes(component) = path_component else {
                    return Err(invalid("Invalid path component type"));
                };
                let component = String::from_utf8(component.to_vec())
                    .map_err(|_| invalid("Invalid UTF-8 in file path"))?;
                path.push(component);
            }

            files.push(TorrentFile { path, length });
        }

        Ok((files, total_length))
    }

    /// Extract announce URLs from torrent dictionary.
    ///
    /// Trackerless descriptors are valid and yield an empty list.
    fn extract_announce_urls(dict: &BencodeDict<'_>) -> Vec<String> {
        let mut announce_urls = Vec::new();

        if let Ok(announce) = Self::extract_bytes_as_string(dict, b"announce") {
            announce_urls.push(announce);
        }

        if let Some(bencode_rs::Value::List(announce_list)) = dict.get(b"announce-list".as_slice())
        {
            for tier in announce_list {
                if let bencode_rs::Value::List(tier_urls) = tier {
                    for url_value in tier_urls {
                        if let bencode_rs::Value::Bytes(url_bytes) = url_value
                            && let Ok(url) = String::from_utf8(url_bytes.to_vec())
                            && !announce_urls.contains(&url)
                        {
                            announce_urls.push(url);
                        }
                    }
                }
            }
        }

        announce_urls
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_find_value_end_simple() {
        let bencode_data = b"d3:keyi42ee";
        let end = BencodeParser::find_value_end(bencode_data).unwrap();
        assert_eq!(end, bencode_data.len());
    }

    #[test]
    fn test_find_value_end_nested() {
        let bencode_data = b"d3:keyd4:namei42eeetrailing";
        let end = BencodeParser::find_value_end(bencode_data).unwrap();
        assert_eq!(end, b"d3:keyd4:namei42eee".len());
    }

    #[test]
    fn test_find_value_end_string_containing_markers() {
        // String payload contains 'e' and 'd' bytes that must not affect depth
        let bencode_data = b"d4:name5:edede4:sizei1ee";
        let end = BencodeParser::find_value_end(bencode_data).unwrap();
        assert_eq!(end, bencode_data.len());
    }

    #[test]
    fn test_find_value_end_scalars() {
        assert_eq!(BencodeParser::find_value_end(b"i-12eXX").unwrap(), 5);
        assert_eq!(BencodeParser::find_value_end(b"4:spamX").unwrap(), 6);
    }

    #[test]
    fn test_find_value_end_incomplete() {
        assert!(BencodeParser::find_value_end(b"d3:key").is_err());
        assert!(BencodeParser::find_value_end(b"d3:key999:").is_err());
        assert!(BencodeParser::find_value_end(b"x").is_err());
    }

    #[test]
    fn test_locate_info_ignores_info_substring_in_values() {
        let data = b"d8:announce14:http://4:info/4:infod4:name1:aee";
        let range = BencodeParser::locate_info_dictionary(data).unwrap();
        assert_eq!(&data[range], b"d4:name1:ae");
    }

    #[test]
    fn test_locate_info_missing() {
        let result = BencodeParser::locate_info_dictionary(b"d8:announce4:teste");
        assert!(result.is_err());
        assert!(BencodeParser::locate_info_dictionary(b"l4:teste").is_err());
    }

    #[test]
    fn test_extract_bytes() {
        let mut bencode_dict = HashMap::new();
        bencode_dict.insert(b"test".as_slice(), bencode_rs::Value::Bytes(b"value"));

        let result = BencodeParser::extract_bytes(&bencode_dict, b"test").unwrap();
        assert_eq!(result, b"value");
        assert!(BencodeParser::extract_bytes(&bencode_dict, b"missing").is_err());
    }

    #[test]
    fn test_extract_non_negative_rejects_negative() {
        let mut bencode_dict = HashMap::new();
        bencode_dict.insert(b"length".as_slice(), bencode_rs::Value::Integer(-5));

        let result = BencodeParser::extract_non_negative(&bencode_dict, b"length");
        assert!(result.is_err());
    }
}
