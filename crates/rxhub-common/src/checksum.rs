//! Checksum utilities for payload integrity verification

use crate::error::{Result, RxhubError};
use crate::types::ChecksumAlgorithm;
use sha2::{Digest, Sha256, Sha512};
use std::io::Read;

/// Compute a hex-encoded digest over an in-memory payload.
pub fn compute_digest(data: &[u8], algorithm: ChecksumAlgorithm) -> String {
    match algorithm {
        ChecksumAlgorithm::Sha256 => hex::encode(Sha256::digest(data)),
        ChecksumAlgorithm::Sha512 => hex::encode(Sha512::digest(data)),
    }
}

/// SHA-256 digest of raw payload bytes, hex-encoded.
///
/// This is the digest recorded on every batch at intake.
pub fn sha256_hex(data: &[u8]) -> String {
    compute_digest(data, ChecksumAlgorithm::Sha256)
}

/// Compute a hex-encoded digest for any readable source.
pub fn compute_checksum<R: Read>(reader: &mut R, algorithm: ChecksumAlgorithm) -> Result<String> {
    let mut buffer = [0u8; 8192];
    match algorithm {
        ChecksumAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            loop {
                let bytes_read = reader.read(&mut buffer)?;
                if bytes_read == 0 {
                    break;
                }
                hasher.update(&buffer[..bytes_read]);
            }
            Ok(hex::encode(hasher.finalize()))
        },
        ChecksumAlgorithm::Sha512 => {
            let mut hasher = Sha512::new();
            loop {
                let bytes_read = reader.read(&mut buffer)?;
                if bytes_read == 0 {
                    break;
                }
                hasher.update(&buffer[..bytes_read]);
            }
            Ok(hex::encode(hasher.finalize()))
        },
    }
}

/// Verify a payload against an expected digest.
pub fn verify_digest(data: &[u8], expected: &str, algorithm: ChecksumAlgorithm) -> Result<()> {
    let actual = compute_digest(data, algorithm);
    if actual == expected {
        Ok(())
    } else {
        Err(RxhubError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_compute_checksum_reader_matches_digest() {
        let data = b"hello world";
        let mut cursor = Cursor::new(data);
        let checksum = compute_checksum(&mut cursor, ChecksumAlgorithm::Sha256).unwrap();
        assert_eq!(checksum, sha256_hex(data));
    }

    #[test]
    fn test_compute_digest_sha512() {
        let checksum = compute_digest(b"hello world", ChecksumAlgorithm::Sha512);
        assert_eq!(
            checksum,
            "309ecc489c12d6eb4cc40f50c902f2b4d0ed77ee511a7c7a9bcd3ca86d4cd86f989dd35bc5ff499670da34255b45b0cfd830e81f605dcf7dc5542e93ae9cd76f"
        );
    }

    #[test]
    fn test_verify_digest_mismatch() {
        let result = verify_digest(b"hello world", "deadbeef", ChecksumAlgorithm::Sha256);
        assert!(matches!(result, Err(RxhubError::ChecksumMismatch { .. })));
    }
}
