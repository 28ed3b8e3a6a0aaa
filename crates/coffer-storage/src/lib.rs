//! # Coffer Storage
//!
//! Object storage backends for Coffer.
//!
//! Every backend implements [`StorageBackend`]. How uploads reach a backend
//! differs, and the difference is part of the type: a backend either hands
//! out a [`StreamingWrite`] capability (bytes flow through this process and
//! are validated and encrypted on the way), or it asks clients to transfer
//! directly using a time-limited [`TransferUrl`].
//!
//! ## Features
//!
//! - **LocalBackend**: on-premises storage; streaming write with signature
//!   validation, SHA-256 checksum and AES-256-GCM sealing in a single pass
//! - **InMemoryObjectStore**: remote object store stand-in issuing signed
//!   transfer URLs; stores bytes as given
//! - **SignatureTable**: accepted file formats by magic number
//!
//! ## Example
//!
//! ```rust,ignore
//! use coffer_storage::{StorageBackend, UploadCapability};
//!
//! match backend.upload_capability() {
//!     UploadCapability::Streaming(writer) => {
//!         let outcome = writer.write(body, "object-1", Some("application/pdf")).await?;
//!         println!("sha256 {}", outcome.checksum);
//!     }
//!     UploadCapability::DirectTransfer => {
//!         let url = backend.transfer_url("object-1", TransferDirection::Upload).await?;
//!         // hand the URL to the client
//!     }
//! }
//! ```

pub mod error;
pub mod key;
pub mod local;
pub mod memory;
pub mod signature;

// Re-exports
pub use error::{ErrorKind, StorageError, StorageResult};
pub use key::{StorageKey, MAX_KEY_LEN};
pub use local::{GcResult, LocalBackend, LocalStorageConfig};
pub use memory::{InMemoryObjectStore, MemoryStoreConfig};
pub use signature::{FileSignature, SignatureTable, DEFAULT_SIGNATURES, SNIFF_LEN};

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Plaintext served to readers
pub type ByteStream = BoxStream<'static, StorageResult<Bytes>>;

/// Request body handed to a streaming write
pub type InboundStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Which backend implementation is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Encrypted files on a local filesystem
    Local,
    /// Remote object store (in-memory stand-in)
    Memory,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Local => f.write_str("local"),
            BackendKind::Memory => f.write_str("memory"),
        }
    }
}

/// Direction a transfer URL authorizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Upload,
    Download,
}

impl TransferDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferDirection::Upload => "upload",
            TransferDirection::Download => "download",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "upload" => Some(TransferDirection::Upload),
            "download" => Some(TransferDirection::Download),
            _ => None,
        }
    }
}

/// A time-limited URL scoped to one object and one direction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferUrl {
    pub url: String,
    pub direction: TransferDirection,
    pub expires_at: DateTime<Utc>,
}

/// Result of a completed streaming write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteOutcome {
    /// Lowercase hex SHA-256 of the plaintext
    pub checksum: String,
    /// Always true for objects sealed by this crate
    pub encrypted: bool,
    /// Plaintext length in bytes
    pub size: u64,
    /// Bytes on the medium (plaintext + 32 byte envelope)
    pub stored_size: u64,
    /// Name of the detected file format; `None` for empty uploads
    pub detected: Option<&'static str>,
}

/// Streaming upload capability
///
/// Only backends that can validate and encrypt in-process provide this.
#[async_trait]
pub trait StreamingWrite: Send + Sync {
    /// Consume `input` and persist it under `key`.
    ///
    /// On any failure nothing is left under `key` and the source is no
    /// longer polled.
    ///
    /// # Errors
    ///
    /// - [`StorageError::ContentRejected`] if the leading bytes match no
    ///   accepted format
    /// - [`StorageError::TooLarge`] if the upload exceeds the size limit
    /// - [`StorageError::Source`] if `input` yields an error
    /// - [`StorageError::Io`] if the medium fails
    async fn write(
        &self,
        input: InboundStream,
        key: &str,
        mime_type: Option<&str>,
    ) -> StorageResult<WriteOutcome>;
}

/// How uploads reach a backend
pub enum UploadCapability<'a> {
    /// Stream bytes through this process
    Streaming(&'a dyn StreamingWrite),
    /// Client uploads directly via [`StorageBackend::transfer_url`]
    DirectTransfer,
}

impl fmt::Debug for UploadCapability<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadCapability::Streaming(_) => f.write_str("Streaming"),
            UploadCapability::DirectTransfer => f.write_str("DirectTransfer"),
        }
    }
}

/// Capabilities shared by every storage backend
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Which upload strategy callers must use
    fn upload_capability(&self) -> UploadCapability<'_>;

    /// Remove an object. Returns `false` if it did not exist.
    async fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Size of the stored object in bytes
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the object does not exist.
    async fn stat(&self, key: &str) -> StorageResult<u64>;

    /// Issue a direct transfer URL, or `None` if this backend serves
    /// transfers itself.
    async fn transfer_url(
        &self,
        key: &str,
        direction: TransferDirection,
    ) -> StorageResult<Option<TransferUrl>>;

    /// Open the object's content as a stream
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream>;

    /// Probe the medium. Never errors; failures are logged and reported as
    /// `false`.
    async fn check_health(&self) -> bool;
}
