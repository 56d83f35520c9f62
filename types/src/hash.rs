use std::fmt;

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of a canonical serialization of an artifact body
/// (spec §6: "Hashes are lowercase hex SHA-256 of a canonical serialization
/// of the payload body"). Used identically by the WG Compiler, Policy
/// Compiler and Agent Hub so "canonical serialization" means one thing.
#[derive(Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn of(bytes: impl AsRef<[u8]>) -> Self {
        let digest = Sha256::digest(bytes.as_ref());
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ContentHash {
    fn from(s: &str) -> Self {
        Self(s.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_identical_input() {
        assert_eq!(ContentHash::of("hello"), ContentHash::of("hello"));
    }

    #[test]
    fn differs_for_different_input() {
        assert_ne!(ContentHash::of("hello"), ContentHash::of("world"));
    }

    #[test]
    fn is_lowercase_hex() {
        let hash = ContentHash::of("hello");
        assert!(hash.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(hash.as_str().len(), 64);
    }
}
