//! Error types for the vault

use coffer_crypto::{CryptoError, TokenError};
use coffer_storage::StorageError;
use thiserror::Error;

/// Errors that can occur while configuring or using the vault
#[derive(Debug, Error)]
pub enum VaultError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Key material or token sealing error
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Token rejected
    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for VaultError {
    fn from(e: std::io::Error) -> Self {
        VaultError::Io(e.to_string())
    }
}

impl From<toml::de::Error> for VaultError {
    fn from(e: toml::de::Error) -> Self {
        VaultError::Config(e.to_string())
    }
}

/// Result type alias for vault operations
pub type VaultResult<T> = Result<T, VaultError>;
