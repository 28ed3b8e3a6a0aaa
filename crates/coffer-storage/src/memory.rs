//! In-memory remote object store
//!
//! Stands in for a bucket-style object store. Uploads never pass through
//! the application: clients receive a signed, expiring transfer URL and the
//! store accepts bytes against it. Nothing is validated or encrypted here;
//! integrity is the remote system's business.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use futures::StreamExt;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, instrument};

use crate::error::{StorageError, StorageResult};
use crate::key::StorageKey;
use crate::{
    BackendKind, ByteStream, StorageBackend, TransferDirection, TransferUrl, UploadCapability,
};

const SCHEME: &str = "memory://";

/// Bytes of the HMAC tag kept in a URL (hex-encoded, so twice as many chars)
const SIGNATURE_LEN: usize = 16;

type UrlMac = Hmac<Sha256>;

/// Configuration for the in-memory store
#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    /// Bucket name embedded in transfer URLs
    pub bucket: String,
    /// Lifetime of issued transfer URLs
    pub url_ttl: Duration,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            bucket: "coffer".to_string(),
            url_ttl: Duration::minutes(15),
        }
    }
}

/// Remote object store substitute backed by a concurrent map
pub struct InMemoryObjectStore {
    config: MemoryStoreConfig,
    secret: [u8; 32],
    objects: DashMap<StorageKey, Bytes>,
}

impl std::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryObjectStore")
            .field("config", &self.config)
            .field("objects", &self.objects.len())
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new(MemoryStoreConfig::default())
    }
}

impl InMemoryObjectStore {
    /// Create an empty store with a random URL signing secret
    pub fn new(config: MemoryStoreConfig) -> Self {
        Self {
            config,
            secret: rand::random(),
            objects: DashMap::new(),
        }
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Issue a transfer URL as of `now`
    pub fn issue_url_at(
        &self,
        key: &str,
        direction: TransferDirection,
        now: DateTime<Utc>,
    ) -> StorageResult<TransferUrl> {
        let key = StorageKey::parse(key)?;
        let expires_at = now + self.config.url_ttl;
        let expires = expires_at.timestamp();
        let signature = self.sign(&key, direction, expires)?;

        Ok(TransferUrl {
            url: format!(
                "{SCHEME}{}/{key}?direction={}&expires={expires}&signature={signature}",
                self.config.bucket,
                direction.as_str()
            ),
            direction,
            expires_at,
        })
    }

    /// Accept a client upload made against an upload URL
    #[instrument(skip(self, url, data), fields(size = data.len()))]
    pub fn complete_direct_upload(
        &self,
        url: &str,
        data: Bytes,
        now: DateTime<Utc>,
    ) -> StorageResult<u64> {
        let key = self.verify(url, TransferDirection::Upload, now)?;
        let size = data.len() as u64;
        debug!(key = %key, "Direct upload completed");
        self.objects.insert(key, data);
        Ok(size)
    }

    /// Serve a client download made against a download URL
    pub fn fetch_direct(&self, url: &str, now: DateTime<Utc>) -> StorageResult<Bytes> {
        let key = self.verify(url, TransferDirection::Download, now)?;
        self.objects
            .get(&key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::not_found(key.as_str()))
    }

    /// HMAC over the canonical URL fields
    fn mac(
        &self,
        key: &StorageKey,
        direction: TransferDirection,
        expires: i64,
    ) -> StorageResult<UrlMac> {
        let mut mac = UrlMac::new_from_slice(&self.secret)
            .map_err(|e| StorageError::Crypto(e.to_string()))?;
        let expires = expires.to_string();
        let fields = [
            self.config.bucket.as_str(),
            key.as_str(),
            direction.as_str(),
            expires.as_str(),
        ];
        mac.update(fields.join("\n").as_bytes());
        Ok(mac)
    }

    fn sign(
        &self,
        key: &StorageKey,
        direction: TransferDirection,
        expires: i64,
    ) -> StorageResult<String> {
        let tag = self.mac(key, direction, expires)?.finalize().into_bytes();
        Ok(hex::encode(&tag[..SIGNATURE_LEN]))
    }

    fn verify(
        &self,
        url: &str,
        expected: TransferDirection,
        now: DateTime<Utc>,
    ) -> StorageResult<StorageKey> {
        let parsed = ParsedUrl::parse(url)?;

        if parsed.bucket != self.config.bucket {
            return Err(StorageError::TransferRejected("wrong bucket".into()));
        }
        if parsed.direction != expected {
            return Err(StorageError::TransferRejected(format!(
                "URL authorizes {}, not {}",
                parsed.direction.as_str(),
                expected.as_str()
            )));
        }

        let key = StorageKey::parse(parsed.key)?;
        let bad_signature = || StorageError::TransferRejected("bad signature".into());
        let signature = hex::decode(parsed.signature).map_err(|_| bad_signature())?;
        if signature.len() != SIGNATURE_LEN {
            return Err(bad_signature());
        }
        self.mac(&key, parsed.direction, parsed.expires)?
            .verify_truncated_left(&signature)
            .map_err(|_| bad_signature())?;
        if now.timestamp() >= parsed.expires {
            return Err(StorageError::TransferRejected("URL expired".into()));
        }

        Ok(key)
    }
}

struct ParsedUrl<'a> {
    bucket: &'a str,
    key: &'a str,
    direction: TransferDirection,
    expires: i64,
    signature: &'a str,
}

impl<'a> ParsedUrl<'a> {
    fn parse(url: &'a str) -> StorageResult<Self> {
        let malformed = || StorageError::TransferRejected("malformed transfer URL".into());

        let rest = url.strip_prefix(SCHEME).ok_or_else(malformed)?;
        let (path, query) = rest.split_once('?').ok_or_else(malformed)?;
        let (bucket, key) = path.split_once('/').ok_or_else(malformed)?;

        let params: HashMap<&str, &str> = query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .collect();

        let direction = params
            .get("direction")
            .and_then(|d| TransferDirection::parse(d))
            .ok_or_else(malformed)?;
        let expires = params
            .get("expires")
            .and_then(|e| e.parse::<i64>().ok())
            .ok_or_else(malformed)?;
        let signature = params.get("signature").copied().ok_or_else(malformed)?;

        Ok(Self {
            bucket,
            key,
            direction,
            expires,
            signature,
        })
    }
}

#[async_trait]
impl StorageBackend for InMemoryObjectStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn upload_capability(&self) -> UploadCapability<'_> {
        UploadCapability::DirectTransfer
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let key = StorageKey::parse(key)?;
        Ok(self.objects.remove(&key).is_some())
    }

    async fn stat(&self, key: &str) -> StorageResult<u64> {
        let key = StorageKey::parse(key)?;
        self.objects
            .get(&key)
            .map(|entry| entry.value().len() as u64)
            .ok_or_else(|| StorageError::not_found(key.as_str()))
    }

    async fn transfer_url(
        &self,
        key: &str,
        direction: TransferDirection,
    ) -> StorageResult<Option<TransferUrl>> {
        self.issue_url_at(key, direction, Utc::now()).map(Some)
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let key = StorageKey::parse(key)?;
        let data = self
            .objects
            .get(&key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::not_found(key.as_str()))?;
        Ok(futures::stream::iter([Ok(data)]).boxed())
    }

    async fn check_health(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_url_shape() {
        let store = InMemoryObjectStore::default();
        let url = store
            .issue_url_at("obj-1", TransferDirection::Upload, now())
            .unwrap();

        assert!(url.url.starts_with("memory://coffer/obj-1?direction=upload&expires="));
        assert_eq!(url.expires_at, now() + Duration::minutes(15));
        let signature = url.url.rsplit("signature=").next().unwrap();
        assert_eq!(signature.len(), SIGNATURE_LEN * 2);
    }

    #[tokio::test]
    async fn test_direct_upload_then_stream() {
        let store = InMemoryObjectStore::default();
        let url = store
            .issue_url_at("obj-1", TransferDirection::Upload, now())
            .unwrap();

        let size = store
            .complete_direct_upload(&url.url, Bytes::from_static(b"anything at all"), now())
            .unwrap();
        assert_eq!(size, 15);
        assert_eq!(store.stat("obj-1").await.unwrap(), 15);

        let chunks: Vec<Bytes> = store
            .get_stream("obj-1")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks.concat(), b"anything at all");
    }

    #[test]
    fn test_expired_url_rejected() {
        let store = InMemoryObjectStore::default();
        let url = store
            .issue_url_at("obj-1", TransferDirection::Upload, now())
            .unwrap();

        let later = now() + Duration::minutes(15);
        assert!(matches!(
            store.complete_direct_upload(&url.url, Bytes::new(), later),
            Err(StorageError::TransferRejected(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_tampered_url_rejected() {
        let store = InMemoryObjectStore::default();
        let url = store
            .issue_url_at("obj-1", TransferDirection::Upload, now())
            .unwrap();

        for tampered in [
            url.url.replace("obj-1", "obj-2"),
            url.url.replace("memory://coffer/", "memory://other/"),
            url.url.replace("expires=", "expires=9"),
            url.url.replace("direction=upload", "direction=download"),
            format!("{}0", url.url),
            "memory://coffer/obj-1".to_string(),
            "https://example.com/obj-1?direction=upload".to_string(),
        ] {
            assert!(
                store
                    .complete_direct_upload(&tampered, Bytes::new(), now())
                    .is_err(),
                "{tampered}"
            );
        }
    }

    #[test]
    fn test_signature_is_truncated_hmac() {
        let store = InMemoryObjectStore::default();
        let url = store
            .issue_url_at("obj-1", TransferDirection::Download, now())
            .unwrap();
        let expires = url.expires_at.timestamp();

        let mut mac = UrlMac::new_from_slice(&store.secret).unwrap();
        mac.update(format!("coffer\nobj-1\ndownload\n{expires}").as_bytes());
        let expected = hex::encode(&mac.finalize().into_bytes()[..SIGNATURE_LEN]);

        assert!(url.url.ends_with(&format!("&signature={expected}")));
    }

    #[test]
    fn test_shortened_signature_rejected() {
        let store = InMemoryObjectStore::default();
        let url = store
            .issue_url_at("obj-1", TransferDirection::Upload, now())
            .unwrap();

        // A correct prefix of the tag must not be enough
        for keep in [2, 8, SIGNATURE_LEN * 2 - 2] {
            let cut = url.url.len() - (SIGNATURE_LEN * 2 - keep);
            let shortened = &url.url[..cut];
            assert!(matches!(
                store.complete_direct_upload(shortened, Bytes::new(), now()),
                Err(StorageError::TransferRejected(_))
            ));
        }
        let not_hex = format!("{}{}", &url.url[..url.url.len() - 2], "zz");
        assert!(store.complete_direct_upload(&not_hex, Bytes::new(), now()).is_err());
        assert!(store.is_empty());

        let signature = url.url.rsplit("signature=").next().unwrap();
        let uppercase = url.url.replace(signature, &signature.to_uppercase());
        assert!(store.complete_direct_upload(&uppercase, Bytes::new(), now()).is_ok());
    }

    #[test]
    fn test_direction_is_enforced() {
        let store = InMemoryObjectStore::default();
        let upload = store
            .issue_url_at("obj-1", TransferDirection::Upload, now())
            .unwrap();
        store
            .complete_direct_upload(&upload.url, Bytes::from_static(b"x"), now())
            .unwrap();

        assert!(store.fetch_direct(&upload.url, now()).is_err());

        let download = store
            .issue_url_at("obj-1", TransferDirection::Download, now())
            .unwrap();
        assert_eq!(&store.fetch_direct(&download.url, now()).unwrap()[..], b"x");
        assert!(
            store
                .complete_direct_upload(&download.url, Bytes::new(), now())
                .is_err()
        );
    }

    #[test]
    fn test_urls_from_another_store_rejected() {
        let a = InMemoryObjectStore::default();
        let b = InMemoryObjectStore::default();
        let url = a
            .issue_url_at("obj-1", TransferDirection::Upload, now())
            .unwrap();
        assert!(b.complete_direct_upload(&url.url, Bytes::new(), now()).is_err());
    }

    #[tokio::test]
    async fn test_no_streaming_write() {
        let store = InMemoryObjectStore::default();
        assert_eq!(store.kind(), BackendKind::Memory);
        assert!(matches!(
            store.upload_capability(),
            UploadCapability::DirectTransfer
        ));
        assert!(store.check_health().await);
    }

    #[tokio::test]
    async fn test_delete_and_missing() {
        let store = InMemoryObjectStore::default();
        let url = store
            .issue_url_at("gone", TransferDirection::Upload, now())
            .unwrap();
        store
            .complete_direct_upload(&url.url, Bytes::from_static(b"x"), now())
            .unwrap();

        assert!(store.delete("gone").await.unwrap());
        assert!(!store.delete("gone").await.unwrap());
        assert!(matches!(
            store.stat("gone").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            store.get_stream("gone").await,
            Err(StorageError::NotFound(_))
        ));
    }
}
