//! Streaming content digests used on both sides of a transfer: the browser
//! declares an MD5 for each uploaded file, and the remote object store reports
//! an MD5 (base64-encoded) for each stored object.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use md5::{Digest, Md5};
use thiserror::Error;

/// Fixed read-buffer size; digesting never loads the whole file into memory.
const READ_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("Invalid digest string: {0}")]
    BadDigest(String),
}

pub type Result<T> = std::result::Result<T, IntegrityError>;

/// Hex-encoded MD5 of the whole file, streamed through a fixed-size buffer.
pub fn file_md5_hex(path: impl AsRef<Path>) -> Result<String> {
    let mut file = File::open(path.as_ref())?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Hex-encoded MD5 of an in-memory buffer.
pub fn bytes_md5_hex(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}

/// Digest comparison is case-insensitive; clients differ on hex casing.
pub fn digests_match(expected_hex: &str, actual_hex: &str) -> bool {
    expected_hex.eq_ignore_ascii_case(actual_hex)
}

/// Converts a hex MD5 into the base64 form reported by remote object stores,
/// so a locally computed digest can be compared against the remote one.
pub fn hex_md5_to_base64(hex: &str) -> Result<String> {
    if !hex.is_ascii() || hex.len() != 32 {
        return Err(IntegrityError::BadDigest(hex.to_string()));
    }

    let mut raw = [0u8; 16];
    for (i, byte) in raw.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[2 * i..2 * i + 2], 16)
            .map_err(|_| IntegrityError::BadDigest(hex.to_string()))?;
    }

    Ok(STANDARD.encode(raw))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_known_digests() {
        assert_eq!(bytes_md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(bytes_md5_hex(b"hello world"), "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn test_file_digest_matches_bytes_digest() {
        let data = vec![7u8; 3 * READ_BUFFER_SIZE + 11];
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();
        file.flush().unwrap();

        assert_eq!(file_md5_hex(file.path()).unwrap(), bytes_md5_hex(&data));
    }

    #[test]
    fn test_flipped_byte_changes_digest() {
        let mut data = vec![42u8; 1024];
        let original = bytes_md5_hex(&data);
        data[512] ^= 1;
        assert_ne!(bytes_md5_hex(&data), original);
    }

    #[test]
    fn test_match_is_case_insensitive() {
        assert!(digests_match("ABCDEF0123456789", "abcdef0123456789"));
        assert!(!digests_match("abcdef0123456789", "abcdef0123456788"));
    }

    #[test]
    fn test_hex_to_base64() {
        // MD5 of the empty string, as a remote store would report it.
        assert_eq!(
            hex_md5_to_base64("d41d8cd98f00b204e9800998ecf8427e").unwrap(),
            "1B2M2Y8AsgTpgAmY7PhCfg=="
        );
    }

    #[test]
    fn test_hex_to_base64_rejects_malformed() {
        assert!(hex_md5_to_base64("not-a-digest").is_err());
        assert!(hex_md5_to_base64("d41d8cd98f00b204").is_err());
        assert!(hex_md5_to_base64("zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz").is_err());
    }
}
