//! Download token codec.
//!
//! Tokens are opaque strings that carry a small JSON payload sealed with
//! AES-256-GCM under the keyring's current key:
//!
//! ```text
//! <32 hex nonce>:<32 hex tag>:<hex ciphertext>
//! ```
//!
//! Every token gets its own random nonce. Opening tries each keyring entry in
//! order and fails closed: a token that does not parse, does not
//! authenticate, or does not decode into the expected payload is treated as
//! absent.

use std::sync::Arc;

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{CryptoError, CryptoResult, TokenError};
use crate::keyring::{KeyMaterial, Keyring};
use crate::stream::{generate_nonce, NONCE_SIZE, TAG_SIZE};

/// AES-256-GCM with a 128-bit nonce
type TokenCipher = AesGcm<Aes256, U16>;

const SEPARATOR: char = ':';

/// Claims carried by a download token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadClaims {
    /// Opaque identifier of the shared entity
    pub id: String,
    /// Expiry as Unix epoch milliseconds; `None` never expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    /// Whether the entity asked for a password before download
    #[serde(default)]
    pub password_protected: bool,
}

impl DownloadClaims {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            expires_at: None,
            password_protected: false,
        }
    }

    /// Set the expiry (Unix millis)
    pub fn with_expiry(mut self, expires_at_millis: i64) -> Self {
        self.expires_at = Some(expires_at_millis);
        self
    }

    /// Expire `ttl` after `now_millis`
    pub fn with_ttl(self, now_millis: i64, ttl: chrono::Duration) -> Self {
        self.with_expiry(now_millis.saturating_add(ttl.num_milliseconds()))
    }

    pub fn with_password(mut self, protected: bool) -> Self {
        self.password_protected = protected;
        self
    }

    /// True once `now_millis` has reached the expiry
    pub fn is_expired_at(&self, now_millis: i64) -> bool {
        self.expires_at.is_some_and(|exp| now_millis >= exp)
    }

    pub fn is_valid_at(&self, now_millis: i64) -> bool {
        !self.is_expired_at(now_millis)
    }
}

/// Seals and opens download tokens against a shared keyring
#[derive(Clone, Debug)]
pub struct TokenCodec {
    keyring: Arc<Keyring>,
}

impl TokenCodec {
    pub fn new(keyring: Arc<Keyring>) -> Self {
        Self { keyring }
    }

    pub fn keyring(&self) -> &Arc<Keyring> {
        &self.keyring
    }

    /// Serialize `payload` to JSON and seal it under the current key.
    pub fn encrypt_payload<T: Serialize>(&self, payload: &T) -> CryptoResult<String> {
        let mut buffer =
            serde_json::to_vec(payload).map_err(|e| CryptoError::Serialization(e.to_string()))?;

        let key = self.keyring.current();
        let nonce = generate_nonce();
        let tag = seal_in_place(key, &nonce, &mut buffer)?;

        trace!(key = %key.fingerprint(), len = buffer.len(), "Sealed token");

        let mut token = String::with_capacity((NONCE_SIZE + TAG_SIZE + buffer.len()) * 2 + 2);
        token.push_str(&hex::encode(nonce));
        token.push(SEPARATOR);
        token.push_str(&hex::encode(tag));
        token.push(SEPARATOR);
        token.push_str(&hex::encode(&buffer));
        Ok(token)
    }

    /// Open a token, returning `None` for any failure.
    pub fn decrypt_payload<T: DeserializeOwned>(&self, token: &str) -> Option<T> {
        match self.open(token) {
            Ok(payload) => Some(payload),
            Err(e) => {
                debug!(error = %e, "Rejected token");
                None
            }
        }
    }

    /// Open a token and report why it was refused.
    ///
    /// Intended for diagnostics. Request handling should use
    /// [`TokenCodec::decrypt_payload`] and treat every failure the same way.
    pub fn open<T: DeserializeOwned>(&self, token: &str) -> Result<T, TokenError> {
        let parsed = ParsedToken::parse(token)?;

        for (index, key) in self.keyring.iter().enumerate() {
            let mut buffer = parsed.ciphertext.clone();
            if open_in_place(key, &parsed.nonce, &parsed.tag, &mut buffer).is_ok() {
                trace!(key_index = index, "Token authenticated");
                return serde_json::from_slice(&buffer)
                    .map_err(|e| TokenError::InvalidPayload(e.to_string()));
            }
        }

        Err(TokenError::AuthenticationFailed)
    }

    /// Issue a token for download claims
    pub fn issue_download(&self, claims: &DownloadClaims) -> CryptoResult<String> {
        self.encrypt_payload(claims)
    }

    /// Open a download token and reject it if expired at `now_millis`
    pub fn verify_download(&self, token: &str, now_millis: i64) -> Option<DownloadClaims> {
        match self.open_download(token, now_millis) {
            Ok(claims) => Some(claims),
            Err(e) => {
                debug!(error = %e, "Rejected download token");
                None
            }
        }
    }

    /// Like [`TokenCodec::verify_download`], but reports why the token was
    /// refused, including [`TokenError::Expired`].
    pub fn open_download(
        &self,
        token: &str,
        now_millis: i64,
    ) -> Result<DownloadClaims, TokenError> {
        let claims: DownloadClaims = self.open(token)?;
        if claims.is_expired_at(now_millis) {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}

/// The three fields of a token after hex decoding
struct ParsedToken {
    nonce: [u8; NONCE_SIZE],
    tag: [u8; TAG_SIZE],
    ciphertext: Vec<u8>,
}

impl ParsedToken {
    fn parse(token: &str) -> Result<Self, TokenError> {
        let fields: Vec<&str> = token.split(SEPARATOR).collect();
        let [nonce_hex, tag_hex, ciphertext_hex] = fields.as_slice() else {
            return Err(TokenError::Malformed(format!(
                "expected 3 fields, found {}",
                fields.len()
            )));
        };

        let mut nonce = [0u8; NONCE_SIZE];
        hex::decode_to_slice(nonce_hex, &mut nonce)
            .map_err(|e| TokenError::Malformed(format!("nonce: {}", e)))?;

        let mut tag = [0u8; TAG_SIZE];
        hex::decode_to_slice(tag_hex, &mut tag)
            .map_err(|e| TokenError::Malformed(format!("tag: {}", e)))?;

        let ciphertext = hex::decode(ciphertext_hex)
            .map_err(|e| TokenError::Malformed(format!("ciphertext: {}", e)))?;

        Ok(Self {
            nonce,
            tag,
            ciphertext,
        })
    }
}

fn cipher_for(key: &KeyMaterial) -> TokenCipher {
    TokenCipher::new(GenericArray::from_slice(key.as_bytes()))
}

fn seal_in_place(
    key: &KeyMaterial,
    nonce: &[u8; NONCE_SIZE],
    buffer: &mut [u8],
) -> CryptoResult<[u8; TAG_SIZE]> {
    let tag = cipher_for(key)
        .encrypt_in_place_detached(GenericArray::from_slice(nonce), b"", buffer)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut out = [0u8; TAG_SIZE];
    out.copy_from_slice(&tag);
    Ok(out)
}

fn open_in_place(
    key: &KeyMaterial,
    nonce: &[u8; NONCE_SIZE],
    tag: &[u8; TAG_SIZE],
    buffer: &mut [u8],
) -> CryptoResult<()> {
    cipher_for(key)
        .decrypt_in_place_detached(
            GenericArray::from_slice(nonce),
            b"",
            buffer,
            GenericArray::from_slice(tag),
        )
        .map_err(|_| CryptoError::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> TokenCodec {
        TokenCodec::new(Arc::new(Keyring::generate()))
    }

    #[test]
    fn test_token_shape() {
        let token = codec()
            .encrypt_payload(&DownloadClaims::new("link-1"))
            .unwrap();

        let fields: Vec<&str> = token.split(':').collect();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0].len(), 32);
        assert_eq!(fields[1].len(), 32);
        assert!(!fields[2].is_empty());
        assert_eq!(fields[2].len() % 2, 0);
        assert!(token
            .chars()
            .all(|c| c == ':' || c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_roundtrip_claims() {
        let codec = codec();
        let claims = DownloadClaims::new("abc123")
            .with_expiry(1_700_000_000_000)
            .with_password(true);

        let token = codec.issue_download(&claims).unwrap();
        let opened: DownloadClaims = codec.decrypt_payload(&token).unwrap();
        assert_eq!(opened, claims);
    }

    #[test]
    fn test_fresh_nonce_per_token() {
        let codec = codec();
        let claims = DownloadClaims::new("same");
        let t1 = codec.encrypt_payload(&claims).unwrap();
        let t2 = codec.encrypt_payload(&claims).unwrap();
        assert_ne!(t1, t2);
        assert_ne!(t1.split(':').next(), t2.split(':').next());
    }

    #[test]
    fn test_wrong_arity_is_malformed() {
        let codec = codec();
        let token = codec.encrypt_payload(&DownloadClaims::new("x")).unwrap();

        let two_fields = token.splitn(3, ':').take(2).collect::<Vec<_>>().join(":");
        let four_fields = format!("{}:00", token);

        for bad in [two_fields.as_str(), four_fields.as_str(), "", "abc"] {
            assert!(matches!(
                codec.open::<DownloadClaims>(bad),
                Err(TokenError::Malformed(_))
            ));
            assert!(codec.decrypt_payload::<DownloadClaims>(bad).is_none());
        }
    }

    #[test]
    fn test_bad_hex_is_malformed() {
        let codec = codec();
        let bad_nonce = format!("{}:{}:{}", "zz".repeat(16), "00".repeat(16), "00");
        let short_tag = format!("{}:{}:{}", "00".repeat(16), "00".repeat(15), "00");
        let odd_ct = format!("{}:{}:{}", "00".repeat(16), "00".repeat(16), "0");

        for bad in [bad_nonce, short_tag, odd_ct] {
            assert!(matches!(
                codec.open::<DownloadClaims>(&bad),
                Err(TokenError::Malformed(_))
            ));
        }
    }

    #[test]
    fn test_unknown_key_fails_closed() {
        let token = codec().encrypt_payload(&DownloadClaims::new("x")).unwrap();
        let other = codec();
        assert_eq!(
            other.open::<DownloadClaims>(&token),
            Err(TokenError::AuthenticationFailed)
        );
        assert!(other.decrypt_payload::<DownloadClaims>(&token).is_none());
    }

    #[test]
    fn test_rotation_keeps_old_tokens_valid() {
        let old_ring = Keyring::generate();
        let old_codec = TokenCodec::new(Arc::new(old_ring.clone()));
        let claims = DownloadClaims::new("rotated");
        let old_token = old_codec.encrypt_payload(&claims).unwrap();

        let rotated = Arc::new(old_ring.rotate(KeyMaterial::generate()));
        let codec = TokenCodec::new(rotated.clone());

        let opened: DownloadClaims = codec.decrypt_payload(&old_token).unwrap();
        assert_eq!(opened, claims);

        // New tokens are sealed with the new key only
        let new_token = codec.encrypt_payload(&claims).unwrap();
        assert!(old_codec.decrypt_payload::<DownloadClaims>(&new_token).is_none());

        // Dropping the old key retires its tokens
        let retired = TokenCodec::new(Arc::new(rotated.retain_newest(1).unwrap()));
        assert!(retired.decrypt_payload::<DownloadClaims>(&old_token).is_none());
    }

    #[test]
    fn test_wrong_payload_shape_is_invalid() {
        let codec = codec();
        let token = codec.encrypt_payload(&vec![1, 2, 3]).unwrap();
        assert!(matches!(
            codec.open::<DownloadClaims>(&token),
            Err(TokenError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_expiry() {
        let codec = codec();
        let claims = DownloadClaims::new("temp").with_ttl(1_000, chrono::Duration::seconds(60));
        assert_eq!(claims.expires_at, Some(61_000));
        assert!(claims.is_valid_at(60_999));
        assert!(!claims.is_valid_at(61_000));

        let token = codec.issue_download(&claims).unwrap();
        assert!(codec.verify_download(&token, 60_999).is_some());
        assert!(codec.verify_download(&token, 61_000).is_none());

        let forever = codec.issue_download(&DownloadClaims::new("forever")).unwrap();
        assert!(codec.verify_download(&forever, i64::MAX).is_some());
    }

    #[test]
    fn test_open_download_reports_expiry() {
        let codec = codec();
        let claims = DownloadClaims::new("temp").with_expiry(5_000);
        let token = codec.issue_download(&claims).unwrap();

        assert_eq!(codec.open_download(&token, 4_999), Ok(claims));
        assert_eq!(codec.open_download(&token, 5_000), Err(TokenError::Expired));
        assert!(matches!(
            codec.open_download("a:b", 0),
            Err(TokenError::Malformed(_))
        ));
    }

    #[test]
    fn test_uppercase_hex_accepted() {
        let codec = codec();
        let claims = DownloadClaims::new("upper");
        let token = codec.encrypt_payload(&claims).unwrap().to_uppercase();
        assert_eq!(codec.decrypt_payload::<DownloadClaims>(&token), Some(claims));
    }
}
