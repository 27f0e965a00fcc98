//! Bencoded descriptor construction
//!
//! Builds info dictionaries and complete descriptors for transfers whose
//! metadata did not arrive as a descriptor file, so every transfer can be
//! persisted in the same on-disk format.

/// Appends a bencoded byte string.
fn push_bytes(buffer: &mut Vec<u8>, bytes: &[u8]) {
    buffer.extend_from_slice(bytes.len().to_string().as_bytes());
    buffer.push(b':');
    buffer.extend_from_slice(bytes);
}

/// Appends a bencoded integer.
fn push_integer(buffer: &mut Vec<u8>, value: u64) {
    buffer.push(b'i');
    buffer.extend_from_slice(value.to_string().as_bytes());
    buffer.push(b'e');
}

/// Builds a single-file info dictionary.
///
/// Keys are emitted in sorted order so the result hashes the same way any
/// conforming client would hash it.
pub fn build_single_file_info(
    name: &str,
    length: u64,
    piece_length: u32,
    piece_hashes: &[[u8; 20]],
) -> Vec<u8> {
    let mut info = Vec::with_capacity(64 + name.len() + piece_hashes.len() * 20);

    info.push(b'd');
    push_bytes(&mut info, b"length");
    push_integer(&mut info, length);
    push_bytes(&mut info, b"name");
    push_bytes(&mut info, name.as_bytes());
    push_bytes(&mut info, b"piece length");
    push_integer(&mut info, u64::from(piece_length));
    push_bytes(&mut info, b"pieces");
    info.extend_from_slice((piece_hashes.len() * 20).to_string().as_bytes());
    info.push(b':');
    for hash in piece_hashes {
        info.extend_from_slice(hash);
    }
    info.push(b'e');

    info
}

/// Wraps raw info dictionary bytes into a complete descriptor.
///
/// The info bytes are embedded verbatim, preserving the info hash. The first
/// announce URL becomes `announce`; all of them form a single
/// `announce-list` tier. Trackerless descriptors omit both keys.
pub fn build_descriptor(info_bytes: &[u8], announce_urls: &[String]) -> Vec<u8> {
    let mut descriptor = Vec::with_capacity(info_bytes.len() + 64);

    descriptor.push(b'd');
    if let Some(primary) = announce_urls.first() {
        push_bytes(&mut descriptor, b"announce");
        push_bytes(&mut descriptor, primary.as_bytes());

        push_bytes(&mut descriptor, b"announce-list");
        descriptor.extend_from_slice(b"ll");
        for url in announce_urls {
            push_bytes(&mut descriptor, url.as_bytes());
        }
        descriptor.extend_from_slice(b"ee");
    }
    push_bytes(&mut descriptor, b"info");
    descriptor.extend_from_slice(info_bytes);
    descriptor.push(b'e');

    descriptor
}
