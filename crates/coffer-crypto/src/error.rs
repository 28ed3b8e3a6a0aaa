//! Error types for coffer-crypto

use thiserror::Error;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Tag verification failed. Wrong key and tampered data are not
    /// distinguished.
    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Keyring is empty")]
    EmptyKeyring,

    #[error("Message exceeds the AES-GCM length limit of {limit} bytes")]
    MessageTooLong { limit: u64 },

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

/// Result type for crypto operations
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Reasons a download token was refused.
///
/// Callers that treat tokens as credentials should not branch on these;
/// [`crate::TokenCodec::decrypt_payload`] collapses them all to `None`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Token failed authentication against every key")]
    AuthenticationFailed,

    #[error("Token payload is not valid: {0}")]
    InvalidPayload(String),

    #[error("Token has expired")]
    Expired,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crypto_error_display() {
        let err = CryptoError::EncryptionFailed("bad key".to_string());
        assert!(format!("{}", err).contains("Encryption failed"));
        assert!(format!("{}", err).contains("bad key"));

        let err = CryptoError::InvalidKey("wrong length".to_string());
        assert!(format!("{}", err).contains("Invalid key"));

        let err = CryptoError::MessageTooLong { limit: 64 };
        assert!(format!("{}", err).contains("64"));
    }

    #[test]
    fn test_authentication_failure_carries_no_detail() {
        let msg = CryptoError::AuthenticationFailed.to_string();
        assert_eq!(msg, "Authentication failed");

        let msg = TokenError::AuthenticationFailed.to_string();
        assert!(!msg.contains("key 0"));
    }
}
