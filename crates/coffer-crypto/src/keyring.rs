//! Ordered set of symmetric keys with one current key.
//!
//! Index 0 is the current key and is the only key used for new encryption.
//! Every key, in order, is eligible when opening download tokens. Operators
//! rotate by putting a freshly generated key in front of the list and keeping
//! older keys until nothing issued under them is still live.

use std::fmt;

use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, CryptoResult};

/// Key size (32 bytes)
pub const KEY_SIZE: usize = 32;

/// A single 256-bit key
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    bytes: [u8; KEY_SIZE],
}

impl KeyMaterial {
    /// Generate a new random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Create from raw key bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Parse a configured key.
    ///
    /// Exactly 64 hex characters are decoded as hex. Anything else is taken
    /// as raw UTF-8 bytes, zero-padded or truncated to 32 bytes. Surrounding
    /// whitespace is ignored when looking for hex but kept in a raw key.
    pub fn from_config_str(value: &str) -> CryptoResult<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(CryptoError::InvalidKey("key is empty".to_string()));
        }

        let mut bytes = [0u8; KEY_SIZE];
        if trimmed.len() == KEY_SIZE * 2 && trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
            hex::decode_to_slice(trimmed, &mut bytes)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        } else {
            let raw = value.as_bytes();
            let n = raw.len().min(KEY_SIZE);
            bytes[..n].copy_from_slice(&raw[..n]);
        }
        Ok(Self { bytes })
    }

    /// Get the raw key bytes (use with caution)
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Lowercase hex encoding, as accepted by [`KeyMaterial::from_config_str`]
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Short identifier safe to log: first 4 bytes of SHA-256 of the key
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.bytes);
        hex::encode(&digest[..4])
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// Immutable ordered list of keys; index 0 is current.
#[derive(Clone)]
pub struct Keyring {
    keys: Vec<KeyMaterial>,
}

impl Keyring {
    /// Build a keyring from keys in priority order
    pub fn new(keys: Vec<KeyMaterial>) -> CryptoResult<Self> {
        if keys.is_empty() {
            return Err(CryptoError::EmptyKeyring);
        }
        Ok(Self { keys })
    }

    /// Keyring with a single freshly generated key
    pub fn generate() -> Self {
        Self {
            keys: vec![KeyMaterial::generate()],
        }
    }

    /// Parse configured key strings; blank entries are skipped.
    pub fn from_config<S: AsRef<str>>(entries: &[S]) -> CryptoResult<Self> {
        let keys = entries
            .iter()
            .map(AsRef::as_ref)
            .filter(|entry| !entry.trim().is_empty())
            .map(KeyMaterial::from_config_str)
            .collect::<CryptoResult<Vec<_>>>()?;
        Self::new(keys)
    }

    /// The key used for every new encryption
    pub fn current(&self) -> &KeyMaterial {
        &self.keys[0]
    }

    /// All keys in decryption order
    pub fn iter(&self) -> impl Iterator<Item = &KeyMaterial> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Always false; a keyring cannot be empty
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Returns a new keyring with `key` as current and the existing keys
    /// demoted behind it.
    pub fn rotate(&self, key: KeyMaterial) -> Self {
        let mut keys = Vec::with_capacity(self.keys.len() + 1);
        keys.push(key);
        keys.extend(self.keys.iter().cloned());
        Self { keys }
    }

    /// Returns a new keyring without keys past `keep` entries
    pub fn retain_newest(&self, keep: usize) -> CryptoResult<Self> {
        Self::new(self.keys.iter().take(keep).cloned().collect())
    }
}

impl fmt::Debug for Keyring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.keys.iter().map(KeyMaterial::fingerprint))
            .finish()
    }
}
