//! SHA-256 hashing helpers
//!
//! All fingerprints in the system (input files, contract, rule tables, header
//! sets, natural keys) are hex-encoded SHA-256 digests so they can be compared
//! across runs and stored as TEXT columns.

use crate::Result;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Hex-encoded SHA-256 of arbitrary bytes
pub fn sha256_hex(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    format!("{:x}", hash)
}

/// Calculate SHA-256 hash of file contents
///
/// Used to fingerprint input CSV files for the batch audit record.
pub fn fingerprint_file(file_path: &Path) -> Result<String> {
    let contents = fs::read(file_path)?;
    Ok(sha256_hex(&contents))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_is_stable() {
        // Known digest of the empty input
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(sha256_hex(b"abc"), sha256_hex(b"abc"));
        assert_ne!(sha256_hex(b"abc"), sha256_hex(b"abd"));
    }

    #[test]
    fn fingerprint_file_matches_content_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.csv");
        std::fs::write(&path, b"project,price\nA,1\n").unwrap();

        let fp = fingerprint_file(&path).unwrap();
        assert_eq!(fp, sha256_hex(b"project,price\nA,1\n"));
    }
}
