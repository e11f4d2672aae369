//! Integrity hashes for framework library artifacts.
//!
//! An integrity string has the form `<algorithm>-<hex digest>`, for example
//! `sha256-9f86d081...`. Catalog manifests publish one per library and the
//! cache re-verifies it on every hit.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Digest algorithm used by an [`Integrity`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityAlgorithm {
    /// SHA-256, what published catalogs use
    Sha256,
    /// BLAKE3, used for locally produced entries
    Blake3,
}

impl IntegrityAlgorithm {
    /// Get algorithm prefix
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Blake3 => "blake3",
        }
    }

    /// Parse algorithm from its prefix
    ///
    /// # Errors
    ///
    /// Returns error if the algorithm is unknown
    pub fn parse(s: &str) -> CoreResult<Self> {
        match s {
            "sha256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            other => Err(CoreError::InvalidIntegrity {
                reason: format!("unknown algorithm '{}'", other),
            }),
        }
    }

    fn digest(self, data: &[u8]) -> [u8; 32] {
        match self {
            Self::Sha256 => {
                let mut out = [0u8; 32];
                out.copy_from_slice(&Sha256::digest(data));
                out
            }
            Self::Blake3 => *blake3::hash(data).as_bytes(),
        }
    }
}

/// Integrity hash of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Integrity {
    algorithm: IntegrityAlgorithm,
    digest: [u8; 32],
}

impl Integrity {
    /// Compute the integrity of `data` with the given algorithm
    #[must_use]
    pub fn compute(algorithm: IntegrityAlgorithm, data: &[u8]) -> Self {
        Self {
            algorithm,
            digest: algorithm.digest(data),
        }
    }

    /// Compute a SHA-256 integrity
    #[must_use]
    pub fn sha256(data: &[u8]) -> Self {
        Self::compute(IntegrityAlgorithm::Sha256, data)
    }

    /// Parse from `<algorithm>-<hex>`
    ///
    /// # Errors
    ///
    /// Returns error if format, algorithm, or digest is invalid
    pub fn parse(s: &str) -> CoreResult<Self> {
        let (algorithm, hex_digest) = s.split_once('-').ok_or_else(|| CoreError::InvalidIntegrity {
            reason: format!("expected '<algorithm>-<digest>', got '{}'", s),
        })?;

        let algorithm = IntegrityAlgorithm::parse(algorithm)?;
        let bytes = hex::decode(hex_digest).map_err(|e| CoreError::InvalidIntegrity {
            reason: e.to_string(),
        })?;
        let digest: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| CoreError::InvalidIntegrity {
            reason: format!("digest is {} bytes, expected 32", b.len()),
        })?;

        Ok(Self { algorithm, digest })
    }

    /// Get algorithm
    #[must_use]
    pub const fn algorithm(&self) -> IntegrityAlgorithm {
        self.algorithm
    }

    /// Get digest as hex
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.digest)
    }

    /// Check if the integrity matches `data`
    #[must_use]
    pub fn matches(&self, data: &[u8]) -> bool {
        self.algorithm.digest(data) == self.digest
    }

    /// Verify `data` against this integrity
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IntegrityMismatch`] if the digest differs
    pub fn verify(&self, data: &[u8]) -> CoreResult<()> {
        let actual = Self::compute(self.algorithm, data);
        if actual != *self {
            return Err(CoreError::IntegrityMismatch {
                expected: self.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Integrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.algorithm.as_str(), self.to_hex())
    }
}

impl FromStr for Integrity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Integrity {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Integrity> for String {
    fn from(integrity: Integrity) -> Self {
        integrity.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_digest() {
        let integrity = Integrity::sha256(b"test");
        assert_eq!(
            integrity.to_string(),
            "sha256-9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
        );
    }

    #[test]
    fn test_parse_display_roundtrip() {
        let integrity = Integrity::compute(IntegrityAlgorithm::Blake3, b"library bytes");
        let parsed = Integrity::parse(&integrity.to_string()).unwrap();
        assert_eq!(parsed, integrity);
        assert_eq!(parsed.algorithm(), IntegrityAlgorithm::Blake3);
    }

    #[test]
    fn test_verify() {
        let integrity = Integrity::sha256(b"payload");
        assert!(integrity.verify(b"payload").is_ok());
        assert!(integrity.matches(b"payload"));

        let err = integrity.verify(b"tampered").unwrap_err();
        assert!(matches!(err, CoreError::IntegrityMismatch { .. }));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Integrity::parse("sha256").is_err());
        assert!(Integrity::parse("md5-abcd").is_err());
        assert!(Integrity::parse("sha256-zz").is_err());
        assert!(Integrity::parse("sha256-abcd").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let integrity = Integrity::sha256(b"x");
        let json = serde_json::to_string(&integrity).unwrap();
        assert_eq!(json, format!("\"{}\"", integrity));

        let back: Integrity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, integrity);
    }
}
