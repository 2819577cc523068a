//! # Content Checksums
//!
//! Schema blobs are identified by a SHA-256 digest of their raw bytes, rendered as
//! lowercase hex. The same digest is used by the [`crate::engine::Engine`] to skip
//! duplicate pushes and by the lifecycle manager to validate its disk cache.
use sha2::{Digest as _, Sha256};
use std::fmt::{self, Write as _};

const DIGEST_HEX_LEN: usize = 64;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChecksumError {
    #[error("Checksum '{0}' is not a {DIGEST_HEX_LEN} character hex digest")]
    Malformed(String),
}

/// A hex encoded SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum(String);

impl Checksum {
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut out = String::with_capacity(DIGEST_HEX_LEN);
        for b in digest.iter() {
            let _ = write!(&mut out, "{b:02x}");
        }
        Self(out)
    }

    /// Parses a digest received from an external party, normalising it to lowercase.
    pub fn parse(value: &str) -> Result<Self, ChecksumError> {
        let value = value.trim();
        if value.len() != DIGEST_HEX_LEN || !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ChecksumError::Malformed(value.to_string()));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison against a raw digest string.
    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other.trim())
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic_and_content_sensitive() {
        let a = Checksum::of(b"schema-v1");
        let b = Checksum::of(b"schema-v1");
        let c = Checksum::of(b"schema-v2");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), DIGEST_HEX_LEN);
    }

    #[test]
    fn known_digest_of_empty_input() {
        assert_eq!(
            Checksum::of(b"").as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn parse_normalises_case_and_rejects_garbage() {
        let upper = Checksum::of(b"x").as_str().to_ascii_uppercase();
        let parsed = Checksum::parse(&upper).unwrap();

        assert_eq!(parsed, Checksum::of(b"x"));
        assert!(Checksum::of(b"x").matches(&upper));
        assert!(matches!(
            Checksum::parse("not-a-digest"),
            Err(ChecksumError::Malformed(_))
        ));
    }
}
