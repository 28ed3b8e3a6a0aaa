//! The vault facade
//!
//! Ties the keyring, the token codec and the active storage backend together.
//! Request handlers go through [`Vault`] and never pick an upload path
//! themselves: [`Vault::begin_upload`] asks the backend which capability it
//! offers.

use std::sync::Arc;

use coffer_crypto::{DownloadClaims, Keyring, TokenCodec};
use coffer_storage::{
    BackendKind, ByteStream, InMemoryObjectStore, InboundStream, LocalBackend, StorageBackend,
    TransferDirection, TransferUrl, UploadCapability, WriteOutcome,
};
use tracing::{debug, info, instrument};

use crate::config::VaultConfig;
use crate::error::VaultResult;

/// How an upload proceeds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadPlan {
    /// The body was streamed, validated and sealed in-process
    Stored(WriteOutcome),
    /// The client must send the body to this URL; the inbound stream was not
    /// consumed
    Direct(TransferUrl),
}

/// Storage and tokens behind one handle
pub struct Vault {
    keyring: Arc<Keyring>,
    codec: TokenCodec,
    backend: Arc<dyn StorageBackend>,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("keyring", &self.keyring)
            .field("backend", &self.backend.kind())
            .finish()
    }
}

impl Vault {
    /// Assemble a vault from parts
    pub fn new(keyring: Arc<Keyring>, backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            codec: TokenCodec::new(keyring.clone()),
            keyring,
            backend,
        }
    }

    /// Build the keyring and the configured backend
    pub async fn from_config(config: &VaultConfig) -> VaultResult<Self> {
        let keyring = Arc::new(config.keyring()?);

        let backend: Arc<dyn StorageBackend> = match config.storage.backend {
            BackendKind::Local => Arc::new(
                LocalBackend::new(
                    config.storage.local(),
                    keyring.clone(),
                    config.storage.signatures()?,
                )
                .await?,
            ),
            BackendKind::Memory => Arc::new(InMemoryObjectStore::new(config.storage.memory())),
        };

        info!(
            backend = %backend.kind(),
            keys = keyring.len(),
            current_key = %keyring.current().fingerprint(),
            "Vault ready"
        );

        Ok(Self::new(keyring, backend))
    }

    pub fn keyring(&self) -> &Arc<Keyring> {
        &self.keyring
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Start an upload using whichever path the backend supports
    #[instrument(skip(self, body), fields(backend = %self.backend.kind()))]
    pub async fn begin_upload(
        &self,
        body: InboundStream,
        key: &str,
        mime_type: Option<&str>,
    ) -> VaultResult<UploadPlan> {
        match self.backend.upload_capability() {
            UploadCapability::Streaming(writer) => {
                let outcome = writer.write(body, key, mime_type).await?;
                Ok(UploadPlan::Stored(outcome))
            }
            UploadCapability::DirectTransfer => {
                drop(body);
                let url = self
                    .backend
                    .transfer_url(key, TransferDirection::Upload)
                    .await?
                    .ok_or(coffer_storage::StorageError::Unsupported(
                        "backend offers neither streaming writes nor upload URLs",
                    ))?;
                debug!(expires_at = %url.expires_at, "Issued direct upload URL");
                Ok(UploadPlan::Direct(url))
            }
        }
    }

    /// Stream an object's content
    pub async fn download(&self, key: &str) -> VaultResult<ByteStream> {
        Ok(self.backend.get_stream(key).await?)
    }

    /// A direct download URL, when the backend serves downloads itself
    pub async fn download_url(&self, key: &str) -> VaultResult<Option<TransferUrl>> {
        Ok(self
            .backend
            .transfer_url(key, TransferDirection::Download)
            .await?)
    }

    pub async fn stat(&self, key: &str) -> VaultResult<u64> {
        Ok(self.backend.stat(key).await?)
    }

    pub async fn delete(&self, key: &str) -> VaultResult<bool> {
        Ok(self.backend.delete(key).await?)
    }

    pub async fn health(&self) -> bool {
        self.backend.check_health().await
    }

    /// Seal download claims into a token
    pub fn issue_download_token(&self, claims: &DownloadClaims) -> VaultResult<String> {
        Ok(self.codec.issue_download(claims)?)
    }

    /// Open a token; `None` for anything forged, malformed or expired
    pub fn verify_download_token(&self, token: &str, now_millis: i64) -> Option<DownloadClaims> {
        self.codec.verify_download(token, now_millis)
    }
}
