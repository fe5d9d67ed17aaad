//! Common types used across RxHub

use serde::{Deserialize, Serialize};

/// Checksum algorithm type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecksumAlgorithm::Sha256 => write!(f, "sha256"),
            ChecksumAlgorithm::Sha512 => write!(f, "sha512"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_algorithm_display() {
        assert_eq!(ChecksumAlgorithm::Sha256.to_string(), "sha256");
        assert_eq!(ChecksumAlgorithm::Sha512.to_string(), "sha512");
    }

    #[test]
    fn test_checksum_algorithm_serde_roundtrip() {
        let json = serde_json::to_string(&ChecksumAlgorithm::Sha256).unwrap();
        assert_eq!(json, "\"sha256\"");
        let parsed: ChecksumAlgorithm = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ChecksumAlgorithm::Sha256);
    }
}
