// src/hash.rs

//! MD5 digest helpers for image integrity
//!
//! Image identity in the manifest format is an MD5 content hash, so all
//! checksum computation and verification in this crate goes through this
//! module. Digests are rendered as lowercase hex strings.

use md5::{Digest, Md5};
use std::fmt;
use std::io::{self, Read};
use std::path::Path;

/// Buffer size for streaming file digests (8 KB)
const DIGEST_BUFFER_SIZE: usize = 8192;

/// Checksum verification failure with both sides of the comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyError {
    pub expected: String,
    pub actual: String,
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "checksum mismatch: expected {}, got {}",
            self.expected, self.actual
        )
    }
}

impl std::error::Error for VerifyError {}

/// Compute the MD5 digest of a byte slice as a hex string
pub fn md5_bytes(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute the MD5 digest of data from a reader
pub fn md5_reader<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Md5::new();
    let mut buffer = [0u8; DIGEST_BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compute the MD5 digest of a file, streaming its contents
pub fn md5_file(path: &Path) -> io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    md5_reader(&mut file)
}

/// Verify a file matches the expected MD5 hex digest
///
/// The expected digest is compared case-insensitively; the returned
/// `VerifyError` carries both sides for error reporting.
pub fn verify_file_md5(path: &Path, expected: &str) -> Result<(), VerifyError> {
    let actual = md5_file(path).map_err(|_| VerifyError {
        expected: expected.to_string(),
        actual: "<file read error>".to_string(),
    })?;

    if actual == expected.to_lowercase() {
        Ok(())
    } else {
        Err(VerifyError {
            expected: expected.to_string(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_bytes_known_value() {
        // RFC 1321 test vector
        assert_eq!(md5_bytes(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(md5_bytes(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_md5_reader_matches_bytes() {
        let data = b"the quick brown fox";
        let mut cursor = std::io::Cursor::new(&data[..]);
        assert_eq!(md5_reader(&mut cursor).unwrap(), md5_bytes(data));
    }

    #[test]
    fn test_verify_file_md5() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, b"abc").unwrap();

        assert!(verify_file_md5(&path, "900150983cd24fb0d6963f7d28e17f72").is_ok());
        // Uppercase digests are accepted
        assert!(verify_file_md5(&path, "900150983CD24FB0D6963F7D28E17F72").is_ok());

        let err = verify_file_md5(&path, "00000000000000000000000000000000").unwrap_err();
        assert_eq!(err.actual, "900150983cd24fb0d6963f7d28e17f72");
    }
}
