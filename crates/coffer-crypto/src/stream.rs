//! Incremental AES-256-GCM with 128-bit nonces.
//!
//! The whole-buffer `aes-gcm` API needs the complete message in memory. Stored
//! objects can be arbitrarily large, so this module drives the same
//! construction one chunk at a time: AES-256 in 32-bit big-endian counter mode
//! for confidentiality and GHASH over the ciphertext for the tag. Output is
//! bit-identical to `AesGcm<Aes256, U16>` with empty associated data.
//!
//! ## Layout produced by callers
//!
//! ```text
//! [nonce: 16 bytes][ciphertext: N bytes][tag: 16 bytes]
//! ```

use aes::Aes256;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};
use ghash::GHash;
use ghash::universal_hash::UniversalHash;
use rand::RngCore;

use crate::error::{CryptoError, CryptoResult};
use crate::keyring::KeyMaterial;

/// Nonce size (16 bytes)
pub const NONCE_SIZE: usize = 16;

/// Authentication tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// Nonce plus tag: the size of an encrypted empty message
pub const ENVELOPE_SIZE: usize = NONCE_SIZE + TAG_SIZE;

/// Largest plaintext GCM can protect under one nonce (2^36 - 32 bytes)
pub const MAX_MESSAGE_LEN: u64 = (1 << 36) - 32;

const BLOCK_SIZE: usize = 16;

type Aes256Ctr = ctr::Ctr32BE<Aes256>;
type Block = aes::Block;

/// Generate a fresh random nonce
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce);
    nonce
}

/// Shared keystream and GHASH state
struct GcmState {
    keystream: Aes256Ctr,
    ghash: GHash,
    tag_mask: Block,
    /// Ciphertext bytes not yet forming a whole GHASH block
    partial: [u8; BLOCK_SIZE],
    partial_len: usize,
    processed: u64,
}

impl GcmState {
    fn new(key: &KeyMaterial, nonce: &[u8; NONCE_SIZE]) -> Self {
        let cipher = Aes256::new(GenericArray::from_slice(key.as_bytes()));

        let mut hash_key = Block::default();
        cipher.encrypt_block(&mut hash_key);

        // Pre-counter block for a nonce that is not 96 bits long:
        // J0 = GHASH(nonce || 0^64 || [bitlen(nonce)]_64)
        let mut nonce_hash = GHash::new(&hash_key);
        nonce_hash.update_padded(nonce);
        let mut len_block = [0u8; BLOCK_SIZE];
        len_block[8..].copy_from_slice(&((NONCE_SIZE as u64) * 8).to_be_bytes());
        nonce_hash.update_padded(&len_block);
        let j0 = nonce_hash.finalize();

        let mut tag_mask = j0;
        cipher.encrypt_block(&mut tag_mask);

        // Payload keystream starts at inc32(J0)
        let mut counter = [0u8; BLOCK_SIZE];
        counter.copy_from_slice(&j0);
        let low = u32::from_be_bytes([counter[12], counter[13], counter[14], counter[15]]);
        counter[12..].copy_from_slice(&low.wrapping_add(1).to_be_bytes());

        let keystream = Aes256Ctr::new(
            GenericArray::from_slice(key.as_bytes()),
            GenericArray::from_slice(&counter),
        );

        Self {
            keystream,
            ghash: GHash::new(&hash_key),
            tag_mask,
            partial: [0u8; BLOCK_SIZE],
            partial_len: 0,
            processed: 0,
        }
    }

    fn reserve(&mut self, len: usize) -> CryptoResult<()> {
        let total = self.processed.saturating_add(len as u64);
        if total > MAX_MESSAGE_LEN {
            return Err(CryptoError::MessageTooLong {
                limit: MAX_MESSAGE_LEN,
            });
        }
        self.processed = total;
        Ok(())
    }

    fn apply_keystream(&mut self, buf: &mut [u8]) -> CryptoResult<()> {
        self.keystream
            .try_apply_keystream(buf)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
    }

    /// Feed ciphertext into GHASH, carrying incomplete blocks between calls
    fn absorb(&mut self, mut data: &[u8]) {
        if self.partial_len > 0 {
            let take = (BLOCK_SIZE - self.partial_len).min(data.len());
            self.partial[self.partial_len..self.partial_len + take]
                .copy_from_slice(&data[..take]);
            self.partial_len += take;
            data = &data[take..];

            if self.partial_len < BLOCK_SIZE {
                return;
            }
            self.ghash.update_padded(&self.partial);
            self.partial_len = 0;
        }

        let whole = data.len() - data.len() % BLOCK_SIZE;
        if whole > 0 {
            self.ghash.update_padded(&data[..whole]);
        }

        let rest = &data[whole..];
        self.partial[..rest.len()].copy_from_slice(rest);
        self.partial_len = rest.len();
    }

    /// Close GHASH over the ciphertext and return (S, tag mask)
    fn close(mut self) -> (GHash, Block) {
        if self.partial_len > 0 {
            let len = self.partial_len;
            self.ghash.update_padded(&self.partial[..len]);
        }

        // No associated data: first half of the length block stays zero
        let mut len_block = [0u8; BLOCK_SIZE];
        len_block[8..].copy_from_slice(&(self.processed * 8).to_be_bytes());
        self.ghash.update_padded(&len_block);

        (self.ghash, self.tag_mask)
    }
}

/// Encrypts a message chunk by chunk under one key and nonce.
pub struct StreamEncryptor {
    state: GcmState,
    nonce: [u8; NONCE_SIZE],
}

impl StreamEncryptor {
    /// Create an encryptor with an explicit nonce
    pub fn new(key: &KeyMaterial, nonce: [u8; NONCE_SIZE]) -> Self {
        Self {
            state: GcmState::new(key, &nonce),
            nonce,
        }
    }

    /// Create an encryptor with a freshly generated nonce
    pub fn with_random_nonce(key: &KeyMaterial) -> Self {
        Self::new(key, generate_nonce())
    }

    pub fn nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.nonce
    }

    /// Plaintext bytes encrypted so far
    pub fn processed(&self) -> u64 {
        self.state.processed
    }

    /// Encrypt `chunk` in place. Output has the same length as input.
    pub fn update(&mut self, chunk: &mut [u8]) -> CryptoResult<()> {
        self.state.reserve(chunk.len())?;
        self.state.apply_keystream(chunk)?;
        self.state.absorb(chunk);
        Ok(())
    }

    /// Finish the message and return its authentication tag
    pub fn finalize(self) -> [u8; TAG_SIZE] {
        let (ghash, mask) = self.state.close();
        let digest = ghash.finalize();

        let mut tag = [0u8; TAG_SIZE];
        for (i, byte) in tag.iter_mut().enumerate() {
            *byte = digest[i] ^ mask[i];
        }
        tag
    }
}

/// Decrypts a message chunk by chunk and verifies the expected tag at the end.
///
/// Plaintext returned by [`StreamDecryptor::update`] is unauthenticated until
/// [`StreamDecryptor::verify`] succeeds; callers must not release the last
/// chunk before that.
pub struct StreamDecryptor {
    state: GcmState,
    expected_tag: [u8; TAG_SIZE],
}

impl StreamDecryptor {
    pub fn new(key: &KeyMaterial, nonce: &[u8; NONCE_SIZE], tag: [u8; TAG_SIZE]) -> Self {
        Self {
            state: GcmState::new(key, nonce),
            expected_tag: tag,
        }
    }

    /// Decrypt `chunk` in place.
    pub fn update(&mut self, chunk: &mut [u8]) -> CryptoResult<()> {
        self.state.reserve(chunk.len())?;
        self.state.absorb(chunk);
        self.state.apply_keystream(chunk)
    }

    /// Check the tag in constant time.
    pub fn verify(self) -> CryptoResult<()> {
        let expected_tag = self.expected_tag;
        let (ghash, mask) = self.state.close();

        // Compare S against tag ^ mask so the comparison stays inside
        // UniversalHash::verify, which is constant time.
        let mut expected = Block::default();
        for (i, byte) in expected.iter_mut().enumerate() {
            *byte = expected_tag[i] ^ mask[i];
        }

        ghash
            .verify(&expected)
            .map_err(|_| CryptoError::AuthenticationFailed)
    }
}
