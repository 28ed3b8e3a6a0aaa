//! On-premises encrypted object storage
//!
//! Objects are laid out as `[nonce:16][ciphertext][tag:16]` under a sharded
//! directory tree. The file name is the storage key itself; the shard
//! directories come from the SHA-256 of the key, e.g. `ba/78/abc`.

mod read;
mod write;

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use coffer_crypto::Keyring;
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::error::{StorageError, StorageResult};
use crate::key::{PARTIAL_SUFFIX, StorageKey};
use crate::signature::SignatureTable;
use crate::{
    BackendKind, ByteStream, InboundStream, StorageBackend, StreamingWrite, TransferDirection,
    TransferUrl, UploadCapability, WriteOutcome,
};

/// Configuration for the local backend
#[derive(Debug, Clone)]
pub struct LocalStorageConfig {
    /// Base directory for objects
    pub base_dir: PathBuf,
    /// Number of subdirectory levels (for sharding)
    pub shard_depth: u8,
    /// Maximum plaintext size of one object (bytes)
    pub max_object_size: u64,
    /// Size of plaintext chunks yielded by reads
    pub read_chunk_size: usize,
    /// Age after which an abandoned `.partial` file is removed by gc
    pub stale_partial_after: Duration,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./data/objects"),
            shard_depth: 2,                          // e.g., ab/cd/<key>
            max_object_size: 2 * 1024 * 1024 * 1024, // 2GB
            read_chunk_size: 64 * 1024,
            stale_partial_after: Duration::from_secs(3600),
        }
    }
}

/// Encrypting filesystem backend
pub struct LocalBackend {
    config: LocalStorageConfig,
    keyring: Arc<Keyring>,
    signatures: SignatureTable,
}

impl std::fmt::Debug for LocalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBackend")
            .field("config", &self.config)
            .field("keyring", &self.keyring)
            .field("formats", &self.signatures.len())
            .finish()
    }
}

impl LocalBackend {
    /// Create a new local backend, creating the base directory if needed
    pub async fn new(
        config: LocalStorageConfig,
        keyring: Arc<Keyring>,
        signatures: SignatureTable,
    ) -> StorageResult<Self> {
        if config.read_chunk_size == 0 {
            return Err(StorageError::InvalidConfig(
                "read_chunk_size must be positive".into(),
            ));
        }

        fs::create_dir_all(&config.base_dir).await?;

        info!(
            path = %config.base_dir.display(),
            formats = signatures.len(),
            keys = keyring.len(),
            "Local object store initialized"
        );

        Ok(Self {
            config,
            keyring,
            signatures,
        })
    }

    pub fn config(&self) -> &LocalStorageConfig {
        &self.config
    }

    pub fn signatures(&self) -> &SignatureTable {
        &self.signatures
    }

    /// Get the file path for a key
    fn object_path(&self, key: &StorageKey) -> PathBuf {
        let shard = key.shard_hex();
        let mut path = self.config.base_dir.clone();

        for i in 0..self.config.shard_depth as usize {
            let start = i * 2;
            let end = start + 2;
            if end <= shard.len() {
                path.push(&shard[start..end]);
            }
        }

        path.push(key.as_str());
        path
    }

    /// Remove an object
    #[instrument(skip(self), fields(key = %key))]
    pub async fn remove(&self, key: &str) -> StorageResult<bool> {
        let key = StorageKey::parse(key)?;
        match fs::remove_file(self.object_path(&key)).await {
            Ok(()) => {
                debug!("Deleted object");
                Ok(true)
            }
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Stored size of an object, envelope included
    pub async fn stored_size(&self, key: &str) -> StorageResult<u64> {
        let key = StorageKey::parse(key)?;
        stored_len(&self.object_path(&key), &key).await
    }

    /// List all committed objects
    pub async fn list_keys(&self) -> StorageResult<Vec<StorageKey>> {
        let mut entries = Vec::new();
        collect_entries(&self.config.base_dir, &mut entries).await?;
        let mut keys: Vec<StorageKey> = entries
            .into_iter()
            .filter_map(|entry| match entry {
                Entry::Object { key, .. } => Some(key),
                Entry::Partial { .. } => None,
            })
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Garbage collect objects the caller no longer references.
    ///
    /// Partial files older than `stale_partial_after` are removed as well;
    /// younger ones may belong to writes still in progress.
    pub async fn gc<F>(&self, is_live: F) -> StorageResult<GcResult>
    where
        F: Fn(&StorageKey) -> bool,
    {
        let mut entries = Vec::new();
        collect_entries(&self.config.base_dir, &mut entries).await?;

        let now = SystemTime::now();
        let mut result = GcResult::default();

        for entry in entries {
            match entry {
                Entry::Object { key, size } => {
                    if is_live(&key) {
                        result.retained_count += 1;
                    } else if self.remove(key.as_str()).await? {
                        result.deleted_count += 1;
                        result.bytes_freed += size;
                    }
                }
                Entry::Partial { path, modified } => {
                    let age = now.duration_since(modified).unwrap_or_default();
                    if age < self.config.stale_partial_after {
                        continue;
                    }
                    match fs::remove_file(&path).await {
                        Ok(()) => result.partials_removed += 1,
                        Err(e) if e.kind() == IoErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }

        info!(
            deleted = result.deleted_count,
            retained = result.retained_count,
            bytes_freed = result.bytes_freed,
            partials_removed = result.partials_removed,
            "Garbage collection complete"
        );

        Ok(result)
    }

    /// Write, read back and remove a probe file in the base directory
    async fn probe(&self) -> StorageResult<()> {
        let payload = rand::random::<[u8; 16]>();
        let path = self.config.base_dir.join(format!(
            ".health.{}{PARTIAL_SUFFIX}",
            hex::encode(&payload[..8])
        ));

        fs::write(&path, payload).await?;
        let read_back = fs::read(&path).await;
        let removed = fs::remove_file(&path).await;

        if read_back? != payload {
            return Err(StorageError::io("health probe read back different bytes"));
        }
        removed?;
        Ok(())
    }
}

/// Result of garbage collection
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GcResult {
    /// Number of objects deleted
    pub deleted_count: usize,
    /// Number of objects retained
    pub retained_count: usize,
    /// Stored bytes freed
    pub bytes_freed: u64,
    /// Number of abandoned partial files removed
    pub partials_removed: usize,
}

enum Entry {
    Object { key: StorageKey, size: u64 },
    Partial { path: PathBuf, modified: SystemTime },
}

/// Recursively collect objects and partial files
fn collect_entries<'a>(
    dir: &'a Path,
    out: &'a mut Vec<Entry>,
) -> Pin<Box<dyn std::future::Future<Output = StorageResult<()>> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let metadata = entry.metadata().await?;

            if metadata.is_dir() {
                collect_entries(&path, out).await?;
                continue;
            }

            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if name.ends_with(PARTIAL_SUFFIX) {
                let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                out.push(Entry::Partial {
                    path: path.clone(),
                    modified,
                });
            } else if let Ok(key) = StorageKey::parse(name) {
                out.push(Entry::Object {
                    key,
                    size: metadata.len(),
                });
            }
        }

        Ok(())
    })
}

async fn stored_len(path: &Path, key: &StorageKey) -> StorageResult<u64> {
    match fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => Ok(metadata.len()),
        Ok(_) => Err(StorageError::corrupted(format!("{key} is not a regular file"))),
        Err(e) if e.kind() == IoErrorKind::NotFound => Err(StorageError::not_found(key.as_str())),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl StreamingWrite for LocalBackend {
    async fn write(
        &self,
        input: InboundStream,
        key: &str,
        mime_type: Option<&str>,
    ) -> StorageResult<WriteOutcome> {
        self.write_object(input, key, mime_type).await
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn upload_capability(&self) -> UploadCapability<'_> {
        UploadCapability::Streaming(self)
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        self.remove(key).await
    }

    async fn stat(&self, key: &str) -> StorageResult<u64> {
        self.stored_size(key).await
    }

    async fn transfer_url(
        &self,
        key: &str,
        _direction: TransferDirection,
    ) -> StorageResult<Option<TransferUrl>> {
        StorageKey::parse(key)?;
        Ok(None)
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        self.read(key).await
    }

    async fn check_health(&self) -> bool {
        match self.probe().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, path = %self.config.base_dir.display(), "Health probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::StreamExt;
    use tempfile::TempDir;

    async fn create_test_backend() -> (LocalBackend, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = LocalStorageConfig {
            base_dir: temp_dir.path().join("objects"),
            ..Default::default()
        };
        let backend = LocalBackend::new(
            config,
            Arc::new(Keyring::generate()),
            SignatureTable::default(),
        )
        .await
        .unwrap();
        (backend, temp_dir)
    }

    fn body(data: &'static [u8]) -> InboundStream {
        futures::stream::iter(vec![Ok(Bytes::from_static(data))]).boxed()
    }

    #[tokio::test]
    async fn test_object_path_is_sharded() {
        let (backend, temp) = create_test_backend().await;
        let key = StorageKey::parse("abc").unwrap();
        let expected = temp.path().join("objects").join("ba").join("78").join("abc");
        assert_eq!(backend.object_path(&key), expected);
    }

    #[tokio::test]
    async fn test_capability_is_streaming() {
        let (backend, _temp) = create_test_backend().await;
        assert_eq!(backend.kind(), BackendKind::Local);
        assert!(matches!(
            backend.upload_capability(),
            UploadCapability::Streaming(_)
        ));
        let url = backend
            .transfer_url("abc", TransferDirection::Download)
            .await
            .unwrap();
        assert!(url.is_none());
    }

    #[tokio::test]
    async fn test_stat_and_delete() {
        let (backend, _temp) = create_test_backend().await;
        backend
            .write(body(b"%PDF-1.4"), "doc", None)
            .await
            .unwrap();

        assert_eq!(backend.stat("doc").await.unwrap(), 8 + 32);

        assert!(backend.delete("doc").await.unwrap());
        assert!(!backend.delete("doc").await.unwrap());
        assert!(matches!(
            backend.stat("doc").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_key_rejected_everywhere() {
        let (backend, _temp) = create_test_backend().await;
        assert!(matches!(
            backend.stat("../escape").await,
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(
            backend.delete("a/b").await,
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(
            backend.write(body(b"%PDF"), "x.partial", None).await,
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_list_keys() {
        let (backend, _temp) = create_test_backend().await;
        for key in ["b", "a", "c"] {
            backend.write(body(b"GIF89a"), key, None).await.unwrap();
        }
        let keys: Vec<String> = backend
            .list_keys()
            .await
            .unwrap()
            .into_iter()
            .map(|k| k.to_string())
            .collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_gc() {
        let (backend, _temp) = create_test_backend().await;
        for key in ["keep-1", "drop", "keep-2"] {
            backend.write(body(b"\x89PNG...."), key, None).await.unwrap();
        }

        let result = backend
            .gc(|k| k.as_str().starts_with("keep"))
            .await
            .unwrap();

        assert_eq!(result.deleted_count, 1);
        assert_eq!(result.retained_count, 2);
        assert_eq!(result.bytes_freed, 8 + 32);
        assert!(matches!(
            backend.stat("drop").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_gc_removes_stale_partials_only() {
        let temp_dir = TempDir::new().unwrap();
        let config = LocalStorageConfig {
            base_dir: temp_dir.path().to_path_buf(),
            stale_partial_after: Duration::ZERO,
            ..Default::default()
        };
        let backend = LocalBackend::new(
            config,
            Arc::new(Keyring::generate()),
            SignatureTable::default(),
        )
        .await
        .unwrap();

        fs::write(temp_dir.path().join("leftover.0123.partial"), b"x")
            .await
            .unwrap();

        let result = backend.gc(|_| true).await.unwrap();
        assert_eq!(result.partials_removed, 1);
        assert!(!temp_dir.path().join("leftover.0123.partial").exists());
    }

    #[tokio::test]
    async fn test_health_probe_leaves_nothing_behind() {
        let (backend, temp) = create_test_backend().await;
        assert!(backend.check_health().await);
        assert!(backend.list_keys().await.unwrap().is_empty());

        let mut dir = fs::read_dir(temp.path().join("objects")).await.unwrap();
        assert!(dir.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_health_fails_when_base_dir_missing() {
        let (backend, temp) = create_test_backend().await;
        fs::remove_dir_all(temp.path().join("objects")).await.unwrap();
        assert!(!backend.check_health().await);
    }

    #[tokio::test]
    async fn test_zero_chunk_size_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config = LocalStorageConfig {
            base_dir: temp_dir.path().to_path_buf(),
            read_chunk_size: 0,
            ..Default::default()
        };
        let result =
            LocalBackend::new(config, Arc::new(Keyring::generate()), SignatureTable::default())
                .await;
        assert!(matches!(result, Err(StorageError::InvalidConfig(_))));
    }
}
