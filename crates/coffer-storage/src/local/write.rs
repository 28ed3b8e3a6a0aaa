//! Streaming write pipeline
//!
//! Each inbound chunk goes through hash, signature gate, encryption and
//! framing before the next chunk is pulled, so a slow disk throttles the
//! source and memory use stays at one chunk.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use coffer_crypto::{KeyMaterial, NONCE_SIZE, StreamEncryptor};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use super::LocalBackend;
use crate::error::{StorageError, StorageResult};
use crate::key::{PARTIAL_SUFFIX, StorageKey};
use crate::signature::{FileSignature, SignatureGate, SignatureTable};
use crate::{InboundStream, WriteOutcome};

impl LocalBackend {
    /// Validate, hash, encrypt and persist `input` under `key`
    #[instrument(skip(self, input), fields(key = %key, mime = mime_type.unwrap_or("-")))]
    pub(crate) async fn write_object(
        &self,
        mut input: InboundStream,
        key: &str,
        mime_type: Option<&str>,
    ) -> StorageResult<WriteOutcome> {
        let key = StorageKey::parse(key)?;
        let path = self.object_path(&key);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let partial = PartialObject::new(&path);
        let mut file = File::create(partial.path()).await?;

        let mut pipeline = SealingPipeline::new(
            self.keyring.current(),
            &self.signatures,
            self.config.max_object_size,
        );
        let mut stored_size = 0u64;

        while let Some(chunk) = input.next().await {
            let chunk = chunk.map_err(|e| StorageError::Source(e.to_string()))?;
            if let Some(framed) = pipeline.push(chunk)? {
                file.write_all(&framed).await?;
                stored_size += framed.len() as u64;
            }
        }
        drop(input);

        let sealed = pipeline.finish()?;
        file.write_all(&sealed.tail).await?;
        stored_size += sealed.tail.len() as u64;

        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        partial.commit(&path).await?;

        let detected = sealed.detected.map(|s| s.name);
        if let (Some(declared), Some(sig)) = (mime_type, sealed.detected.as_ref())
            && !sig.accepts_mime(declared)
        {
            debug!(
                declared,
                detected = sig.name,
                "Declared MIME type disagrees with content signature"
            );
        }

        info!(
            size = sealed.size,
            stored_size,
            format = detected.unwrap_or("empty"),
            "Stored object"
        );

        Ok(WriteOutcome {
            checksum: sealed.checksum,
            encrypted: true,
            size: sealed.size,
            stored_size,
            detected,
        })
    }
}

/// What remains once the source is exhausted
struct Sealed {
    /// Final framed bytes: any held-back plaintext, the nonce if nothing was
    /// written yet, and the tag
    tail: Vec<u8>,
    checksum: String,
    size: u64,
    detected: Option<FileSignature>,
}

/// Hash, validate, encrypt and frame, one chunk at a time
struct SealingPipeline<'a> {
    hasher: Sha256,
    gate: SignatureGate<'a>,
    cipher: StreamEncryptor,
    nonce_written: bool,
    size: u64,
    limit: u64,
}

impl<'a> SealingPipeline<'a> {
    fn new(key: &KeyMaterial, signatures: &'a SignatureTable, limit: u64) -> Self {
        Self {
            hasher: Sha256::new(),
            gate: SignatureGate::new(signatures),
            cipher: StreamEncryptor::with_random_nonce(key),
            nonce_written: false,
            size: 0,
            limit,
        }
    }

    /// Returns framed bytes ready for the sink, if any
    fn push(&mut self, chunk: Bytes) -> StorageResult<Option<Vec<u8>>> {
        self.size += chunk.len() as u64;
        if self.size > self.limit {
            return Err(StorageError::TooLarge { limit: self.limit });
        }

        self.hasher.update(&chunk);
        let cleared = self.gate.push(chunk)?;
        self.seal(&cleared)
    }

    fn seal(&mut self, plaintext: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        if plaintext.is_empty() {
            return Ok(None);
        }

        let header = if self.nonce_written { 0 } else { NONCE_SIZE };
        let mut framed = Vec::with_capacity(header + plaintext.len());
        if !self.nonce_written {
            framed.extend_from_slice(self.cipher.nonce());
            self.nonce_written = true;
        }
        framed.extend_from_slice(plaintext);
        self.cipher.update(&mut framed[header..])?;
        Ok(Some(framed))
    }

    fn finish(mut self) -> StorageResult<Sealed> {
        let held = self.gate.finish()?;
        let mut tail = self.seal(&held)?.unwrap_or_default();
        if !self.nonce_written {
            tail.extend_from_slice(self.cipher.nonce());
        }

        let detected = self.gate.detected().copied();
        tail.extend_from_slice(&self.cipher.finalize());

        Ok(Sealed {
            tail,
            checksum: hex::encode(self.hasher.finalize()),
            size: self.size,
            detected,
        })
    }
}

/// An in-flight object file, removed on drop unless committed
struct PartialObject {
    path: PathBuf,
    committed: bool,
}

impl PartialObject {
    fn new(final_path: &Path) -> Self {
        let name = final_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("object");
        let path = final_path.with_file_name(format!(
            "{name}.{:016x}{PARTIAL_SUFFIX}",
            rand::random::<u64>()
        ));
        Self {
            path,
            committed: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn commit(mut self, final_path: &Path) -> StorageResult<()> {
        fs::rename(&self.path, final_path).await?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartialObject {
    fn drop(&mut self) {
        if !self.committed {
            match std::fs::remove_file(&self.path) {
                Ok(()) => debug!(path = %self.path.display(), "Removed partial object"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove partial object"),
            }
        }
    }
}
