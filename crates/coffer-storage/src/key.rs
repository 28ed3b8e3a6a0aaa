//! Storage keys
//!
//! Keys are opaque object names chosen by the caller. They double as file
//! names on the local backend, so the accepted alphabet is narrow.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::error::{StorageError, StorageResult};

/// Maximum key length in bytes
pub const MAX_KEY_LEN: usize = 255;

/// Suffix reserved for in-flight writes
pub(crate) const PARTIAL_SUFFIX: &str = ".partial";

/// A validated object key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageKey(String);

impl StorageKey {
    /// Validate a raw key
    pub fn parse(raw: &str) -> StorageResult<Self> {
        if raw.is_empty() {
            return Err(StorageError::InvalidKey("key is empty".into()));
        }
        if raw.len() > MAX_KEY_LEN {
            return Err(StorageError::InvalidKey(format!(
                "key is {} bytes, limit is {MAX_KEY_LEN}",
                raw.len()
            )));
        }
        if raw == "." || raw == ".." {
            return Err(StorageError::InvalidKey(format!("{raw:?} is reserved")));
        }
        if let Some(c) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(StorageError::InvalidKey(format!(
                "character {c:?} is not allowed"
            )));
        }
        if raw.ends_with(PARTIAL_SUFFIX) {
            return Err(StorageError::InvalidKey(format!(
                "suffix {PARTIAL_SUFFIX} is reserved"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex SHA-256 of the key, used for directory sharding
    pub(crate) fn shard_hex(&self) -> String {
        hex::encode(Sha256::digest(self.0.as_bytes()))
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StorageKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
