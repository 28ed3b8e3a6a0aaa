//! # Coffer Crypto
//!
//! Cryptographic primitives for Coffer.
//!
//! ## Features
//!
//! - [`Keyring`]: ordered 256-bit keys; index 0 encrypts, all keys decrypt
//! - [`TokenCodec`]: tamper-proof download tokens (`nonce:tag:ciphertext`, hex)
//! - [`StreamEncryptor`] / [`StreamDecryptor`]: chunked AES-256-GCM with
//!   16-byte nonces for stored objects of any size
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use coffer_crypto::{DownloadClaims, Keyring, TokenCodec};
//!
//! let keyring = Arc::new(Keyring::generate());
//! let codec = TokenCodec::new(keyring);
//!
//! let token = codec.issue_download(&DownloadClaims::new("link-42"))?;
//! let claims = codec.verify_download(&token, chrono::Utc::now().timestamp_millis());
//! assert_eq!(claims.unwrap().id, "link-42");
//! ```

pub mod error;
pub mod keyring;
pub mod stream;
pub mod token;

// Re-exports
pub use error::{CryptoError, CryptoResult, TokenError};
pub use keyring::{KeyMaterial, Keyring, KEY_SIZE};
pub use stream::{
    generate_nonce, StreamDecryptor, StreamEncryptor, ENVELOPE_SIZE, MAX_MESSAGE_LEN, NONCE_SIZE,
    TAG_SIZE,
};
pub use token::{DownloadClaims, TokenCodec};
