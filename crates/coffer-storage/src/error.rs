//! Error types for coffer-storage
//!
//! Every failure carries a specific kind so callers can tell rejected
//! content, damaged objects and failing media apart.

use coffer_crypto::CryptoError;
use thiserror::Error;

/// Errors that can occur in storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// Upload did not start with an accepted file signature
    #[error("Content rejected: {reason}")]
    ContentRejected { reason: String },

    /// Requested object was not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stored object is structurally invalid
    #[error("Corrupted object: {0}")]
    Corrupted(String),

    /// Authentication tag did not verify
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// I/O error on the storage medium
    #[error("I/O error: {0}")]
    Io(String),

    /// The inbound stream failed before completion
    #[error("Source stream failed: {0}")]
    Source(String),

    /// Upload exceeded the configured size limit
    #[error("Object exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },

    /// Storage key is not usable as an object name
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    /// Backend does not offer this capability
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Transfer URL did not verify or has expired
    #[error("Transfer URL rejected: {0}")]
    TransferRejected(String),

    /// Backend configuration is unusable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Encryption failed while sealing
    #[error("Crypto error: {0}")]
    Crypto(String),
}

/// Coarse classification of a [`StorageError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ContentRejected,
    NotFound,
    Corrupted,
    AuthenticationFailed,
    StorageIo,
    InvalidRequest,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<CryptoError> for StorageError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::AuthenticationFailed => StorageError::AuthenticationFailed,
            other => StorageError::Crypto(other.to_string()),
        }
    }
}

impl StorageError {
    /// Create a new NotFound error
    pub fn not_found(item: impl Into<String>) -> Self {
        Self::NotFound(item.into())
    }

    /// Create a new Corrupted error
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }

    /// Create a new ContentRejected error
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::ContentRejected {
            reason: reason.into(),
        }
    }

    /// Create a new I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::ContentRejected { .. } | StorageError::TooLarge { .. } => {
                ErrorKind::ContentRejected
            }
            StorageError::NotFound(_) => ErrorKind::NotFound,
            StorageError::Corrupted(_) => ErrorKind::Corrupted,
            StorageError::AuthenticationFailed => ErrorKind::AuthenticationFailed,
            StorageError::Io(_) | StorageError::Source(_) | StorageError::Crypto(_) => {
                ErrorKind::StorageIo
            }
            StorageError::InvalidKey(_)
            | StorageError::Unsupported(_)
            | StorageError::TransferRejected(_)
            | StorageError::InvalidConfig(_) => ErrorKind::InvalidRequest,
        }
    }

    /// Only medium failures are worth retrying; everything else is a
    /// property of the request or the stored data.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let err = StorageError::not_found("test-item");
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(err.to_string().contains("test-item"));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let storage_err: StorageError = io_err.into();
        assert!(matches!(storage_err, StorageError::Io(_)));
        assert!(storage_err.is_retryable());
    }

    #[test]
    fn test_crypto_error_conversion() {
        let err: StorageError = CryptoError::AuthenticationFailed.into();
        assert!(matches!(err, StorageError::AuthenticationFailed));
        assert!(!err.is_retryable());

        let err: StorageError = CryptoError::MessageTooLong { limit: 1 }.into();
        assert!(matches!(err, StorageError::Crypto(_)));
    }

    #[test]
    fn test_rejected_is_distinct_from_storage_failure() {
        let rejected = StorageError::rejected("unknown signature");
        assert_eq!(rejected.kind(), ErrorKind::ContentRejected);
        assert!(!rejected.is_retryable());

        let disk = StorageError::io("disk full");
        assert_eq!(disk.kind(), ErrorKind::StorageIo);
        assert_ne!(rejected.kind(), disk.kind());
    }

    #[test]
    fn test_corrupted_and_auth_are_distinct_kinds() {
        assert_eq!(
            StorageError::corrupted("too small").kind(),
            ErrorKind::Corrupted
        );
        assert_eq!(
            StorageError::AuthenticationFailed.kind(),
            ErrorKind::AuthenticationFailed
        );
    }
}
