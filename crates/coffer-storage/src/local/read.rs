//! Streaming read pipeline
//!
//! The envelope (nonce and tag) is pulled out with two short positioned
//! reads on a handle that is closed before streaming starts. Content is read
//! through a second handle limited to the ciphertext region.
//!
//! Reads always use the current key. Objects are sealed with the current key
//! at write time, so an object written before a rotation is unreadable until
//! it is rewritten; tokens are the only place where older keys are tried.

use std::io::{ErrorKind as IoErrorKind, SeekFrom};
use std::path::Path;

use bytes::Bytes;
use coffer_crypto::{ENVELOPE_SIZE, NONCE_SIZE, StreamDecryptor, TAG_SIZE};
use futures::{Stream, StreamExt, TryStreamExt, stream};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument, warn};

use super::{LocalBackend, stored_len};
use crate::ByteStream;
use crate::error::{StorageError, StorageResult};
use crate::key::StorageKey;

impl LocalBackend {
    /// Open an object and stream its decrypted content.
    ///
    /// Structural problems are reported before the stream is returned. A tag
    /// mismatch can only be known once all ciphertext has been processed and
    /// arrives as the last item of the stream, in place of the final chunk.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if there is no object under `key`
    /// - [`StorageError::Corrupted`] if the object cannot hold an envelope
    #[instrument(skip(self), fields(key = %key))]
    pub async fn read(&self, key: &str) -> StorageResult<ByteStream> {
        let key = StorageKey::parse(key)?;
        let path = self.object_path(&key);

        let size = stored_len(&path, &key).await?;
        if size < ENVELOPE_SIZE as u64 {
            warn!(size, "Object smaller than envelope");
            return Err(StorageError::corrupted(format!(
                "{key} is {size} bytes, minimum is {ENVELOPE_SIZE}"
            )));
        }

        let (nonce, tag) = read_envelope(&path, size).await?;
        let decryptor = StreamDecryptor::new(self.keyring.current(), &nonce, tag);

        let mut content = File::open(&path).await.map_err(|e| match e.kind() {
            IoErrorKind::NotFound => StorageError::not_found(key.as_str()),
            _ => e.into(),
        })?;
        content.seek(SeekFrom::Start(NONCE_SIZE as u64)).await?;
        let region = content.take(size - ENVELOPE_SIZE as u64);

        debug!(
            ciphertext_len = size - ENVELOPE_SIZE as u64,
            "Streaming object"
        );

        let chunks = ReaderStream::with_capacity(region, self.config.read_chunk_size);
        Ok(decrypt_stream(chunks, decryptor).boxed())
    }

    /// Read a whole object into memory
    pub async fn read_to_vec(&self, key: &str) -> StorageResult<Vec<u8>> {
        let stream = self.read(key).await?;
        stream
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
    }
}

/// Read the leading nonce and trailing tag
async fn read_envelope(
    path: &Path,
    size: u64,
) -> StorageResult<([u8; NONCE_SIZE], [u8; TAG_SIZE])> {
    let mut handle = File::open(path).await?;

    let mut nonce = [0u8; NONCE_SIZE];
    handle.read_exact(&mut nonce).await.map_err(envelope_err)?;

    handle.seek(SeekFrom::Start(size - TAG_SIZE as u64)).await?;
    let mut tag = [0u8; TAG_SIZE];
    handle.read_exact(&mut tag).await.map_err(envelope_err)?;

    Ok((nonce, tag))
}

fn envelope_err(e: std::io::Error) -> StorageError {
    if e.kind() == IoErrorKind::UnexpectedEof {
        StorageError::corrupted("object truncated while reading envelope")
    } else {
        e.into()
    }
}

struct DecryptState<S> {
    chunks: S,
    decryptor: Option<StreamDecryptor>,
    /// Latest plaintext, released once more ciphertext arrives or the tag
    /// verifies
    pending: Option<Bytes>,
}

/// Decrypt `chunks`, holding back one chunk so the last plaintext is only
/// yielded after authentication.
fn decrypt_stream<S>(
    chunks: S,
    decryptor: StreamDecryptor,
) -> impl Stream<Item = StorageResult<Bytes>> + Send + 'static
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin + Send + 'static,
{
    let state = DecryptState {
        chunks,
        decryptor: Some(decryptor),
        pending: None,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            let decryptor = state.decryptor.as_mut()?;

            match state.chunks.next().await {
                Some(Ok(chunk)) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    let mut buf = chunk.to_vec();
                    if let Err(e) = decryptor.update(&mut buf) {
                        state.decryptor = None;
                        state.pending = None;
                        return Some((Err(e.into()), state));
                    }
                    if let Some(ready) = state.pending.replace(Bytes::from(buf)) {
                        return Some((Ok(ready), state));
                    }
                }
                Some(Err(e)) => {
                    state.decryptor = None;
                    state.pending = None;
                    return Some((Err(StorageError::from(e)), state));
                }
                None => {
                    let decryptor = state.decryptor.take()?;
                    return match decryptor.verify() {
                        Ok(()) => {
                            let last = state.pending.take()?;
                            Some((Ok(last), state))
                        }
                        Err(_) => {
                            warn!("Object failed authentication");
                            state.pending = None;
                            Some((Err(StorageError::AuthenticationFailed), state))
                        }
                    };
                }
            }
        }
    })
}
