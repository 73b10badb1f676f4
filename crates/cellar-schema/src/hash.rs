//! Checksum parsing and streaming content hashing.

use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::fmt;
use std::str::FromStr;

/// Hash algorithms accepted in formula checksums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// SHA-256, the default when a bare digest is given.
    Sha256,
    /// BLAKE3 with a 256-bit output.
    Blake3,
}

impl ChecksumAlgorithm {
    /// Lowercase identifier used as the checksum prefix and cache directory.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Blake3 => "blake3",
        }
    }

    /// Start a streaming hasher for this algorithm.
    pub fn hasher(self) -> ContentHasher {
        match self {
            Self::Sha256 => ContentHasher::Sha256(sha2::Sha256::new()),
            Self::Blake3 => ContentHasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a checksum string is not a recognized hash encoding.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ChecksumParseError {
    /// The `<algorithm>:` prefix names an unsupported algorithm.
    #[error("unsupported checksum algorithm '{0}'")]
    UnknownAlgorithm(String),

    /// The digest portion is not 64 hex characters.
    #[error("invalid {algorithm} digest '{digest}': expected 64 hex characters")]
    InvalidDigest {
        /// Algorithm the digest was parsed for.
        algorithm: ChecksumAlgorithm,
        /// The rejected digest text.
        digest: String,
    },
}

/// A content checksum: algorithm plus lowercase hex digest.
///
/// Accepted encodings are `sha256:<hex>`, `blake3:<hex>`, and a bare 64-char
/// hex string (treated as SHA-256, the common formula convention).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum {
    algorithm: ChecksumAlgorithm,
    hex: String,
}

impl Checksum {
    /// Build a checksum from an algorithm and digest, validating the digest.
    ///
    /// # Errors
    ///
    /// Returns [`ChecksumParseError::InvalidDigest`] if `hex` is not 64 hex chars.
    pub fn new(algorithm: ChecksumAlgorithm, hex: &str) -> Result<Self, ChecksumParseError> {
        if hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Self {
                algorithm,
                hex: hex.to_ascii_lowercase(),
            })
        } else {
            Err(ChecksumParseError::InvalidDigest {
                algorithm,
                digest: hex.to_string(),
            })
        }
    }

    /// Compute the checksum of an in-memory buffer.
    pub fn of_bytes(algorithm: ChecksumAlgorithm, bytes: &[u8]) -> Self {
        let mut hasher = algorithm.hasher();
        hasher.update(bytes);
        hasher.finish()
    }

    /// The hash algorithm.
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Lowercase hex digest.
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl FromStr for Checksum {
    type Err = ChecksumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once(':') {
            Some((algo, digest)) => {
                let algorithm = match algo.to_ascii_lowercase().as_str() {
                    "sha256" => ChecksumAlgorithm::Sha256,
                    "blake3" => ChecksumAlgorithm::Blake3,
                    other => return Err(ChecksumParseError::UnknownAlgorithm(other.to_string())),
                };
                Self::new(algorithm, digest)
            }
            None => Self::new(ChecksumAlgorithm::Sha256, s),
        }
    }
}

impl TryFrom<String> for Checksum {
    type Error = ChecksumParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Checksum> for String {
    fn from(c: Checksum) -> Self {
        c.to_string()
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

/// Streaming hasher over either supported algorithm.
pub enum ContentHasher {
    /// SHA-256 state.
    Sha256(sha2::Sha256),
    /// BLAKE3 state (boxed, the hasher is large).
    Blake3(Box<blake3::Hasher>),
}

impl fmt::Debug for ContentHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha256(_) => f.write_str("ContentHasher::Sha256"),
            Self::Blake3(_) => f.write_str("ContentHasher::Blake3"),
        }
    }
}

impl ContentHasher {
    /// Feed bytes into the hasher.
    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(bytes),
            Self::Blake3(h) => {
                h.update(bytes);
            }
        }
    }

    /// Consume the hasher and produce the resulting checksum.
    pub fn finish(self) -> Checksum {
        match self {
            Self::Sha256(h) => Checksum {
                algorithm: ChecksumAlgorithm::Sha256,
                hex: hex::encode(h.finalize()),
            },
            Self::Blake3(h) => Checksum {
                algorithm: ChecksumAlgorithm::Blake3,
                hex: h.finalize().to_hex().to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_bare_digest_is_sha256() {
        let c: Checksum = EMPTY_SHA256.parse().unwrap();
        assert_eq!(c.algorithm(), ChecksumAlgorithm::Sha256);
        assert_eq!(c.to_string(), format!("sha256:{EMPTY_SHA256}"));
    }

    #[test]
    fn test_prefixed_digest_normalizes_case() {
        let upper = EMPTY_SHA256.to_uppercase();
        let c: Checksum = format!("SHA256:{upper}").parse().unwrap();
        assert_eq!(c.hex(), EMPTY_SHA256);
    }

    #[test]
    fn test_rejects_short_digest() {
        let err = "abc123".parse::<Checksum>().unwrap_err();
        assert!(matches!(err, ChecksumParseError::InvalidDigest { .. }));
    }

    #[test]
    fn test_rejects_unknown_algorithm() {
        let err = format!("md5:{EMPTY_SHA256}").parse::<Checksum>().unwrap_err();
        assert_eq!(err, ChecksumParseError::UnknownAlgorithm("md5".to_string()));
    }

    #[test]
    fn test_of_bytes_matches_known_digest() {
        let c = Checksum::of_bytes(ChecksumAlgorithm::Sha256, b"");
        assert_eq!(c.hex(), EMPTY_SHA256);
    }

    #[test]
    fn test_blake3_streaming_equals_one_shot() {
        let mut h = ChecksumAlgorithm::Blake3.hasher();
        h.update(b"hello ");
        h.update(b"world");
        assert_eq!(
            h.finish(),
            Checksum::of_bytes(ChecksumAlgorithm::Blake3, b"hello world")
        );
    }
}
