//! Authenticated encryption for the token cache.
//!
//! [`CryptoBox`] wraps AES-256-GCM behind a byte-in/byte-out contract:
//!
//! - [`CryptoBox::encrypt`] produces an ASCII envelope (base64 of a small JSON
//!   document holding the nonce and ciphertext), so an encrypted cache file can
//!   never be mistaken for a plain JSON cache.
//! - [`CryptoBox::decrypt`] returns [`CryptoError::Authentication`] when the
//!   key is wrong or the data was tampered with, and [`CryptoError::Malformed`]
//!   when the input is not an envelope at all. Callers use the distinction to
//!   fall back to an empty cache instead of failing.
//!
//! ## Key material
//!
//! Keys are 32 raw bytes, supplied base64-encoded (URL-safe or standard, with
//! or without padding). [`CryptoBox::for_session`] resolves the key for a
//! process: a configured key wins, a missing key yields the process-wide
//! ephemeral key (generated once, with a warning, since tokens will not
//! survive a restart), and a malformed key disables encryption for the
//! session.
//!
//! ```rust
//! use tradeauth_common::crypto::CryptoBox;
//!
//! let key = CryptoBox::generate_key();
//! let sealed = CryptoBox::new(&key)?;
//!
//! let envelope = sealed.encrypt(b"{\"default\":{}}")?;
//! assert_eq!(sealed.decrypt(&envelope)?, b"{\"default\":{}}");
//! # Ok::<(), tradeauth_common::crypto::CryptoError>(())
//! ```

use std::sync::OnceLock;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Algorithm tag written into every envelope.
pub const ALGORITHM: &str = "AES-256-GCM";

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Ephemeral key shared by every keyless session in this process.
static PROCESS_KEY: OnceLock<[u8; KEY_LEN]> = OnceLock::new();

/// Failures raised by [`CryptoBox`].
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key material could not be decoded or has the wrong length.
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),

    /// The envelope is well formed but does not authenticate under this key.
    /// Either the key was rotated or the data was modified.
    #[error("ciphertext failed authentication (wrong key or tampered data)")]
    Authentication,

    /// The input is not an envelope produced by [`CryptoBox::encrypt`].
    #[error("malformed ciphertext envelope: {0}")]
    Malformed(String),

    /// Sealing failed inside the cipher.
    #[error("encryption failed: {0}")]
    Encrypt(String),
}

/// Serialized envelope around a sealed payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedData {
    /// Per-message random nonce.
    pub nonce: Vec<u8>,
    /// Ciphertext with the GCM tag appended.
    pub ciphertext: Vec<u8>,
    /// Always [`ALGORITHM`].
    pub algorithm: String,
}

/// AES-256-GCM sealing bound to a single key.
pub struct CryptoBox {
    cipher: Aes256Gcm,
    fingerprint: String,
    ephemeral: bool,
}

impl std::fmt::Debug for CryptoBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoBox")
            .field("key", &"[REDACTED]")
            .field("fingerprint", &self.fingerprint)
            .field("ephemeral", &self.ephemeral)
            .finish()
    }
}

impl CryptoBox {
    /// Create a box from a raw 32-byte key.
    ///
    /// # Errors
    /// Returns [`CryptoError::InvalidKey`] if the key is not exactly 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "expected {KEY_LEN} bytes, got {}",
                key.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| CryptoError::InvalidKey(format!("cipher rejected key: {e}")))?;

        Ok(Self { cipher, fingerprint: fingerprint(key), ephemeral: false })
    }

    /// Create a box from base64-encoded key material.
    ///
    /// Accepts URL-safe and standard alphabets, padded or not.
    ///
    /// # Errors
    /// Returns [`CryptoError::InvalidKey`] if the text does not decode to 32
    /// bytes.
    pub fn from_encoded_key(material: &str) -> Result<Self, CryptoError> {
        let key = decode_key(material)?;
        Self::new(&key)
    }

    /// Create a box around a freshly generated key that lives only as long as
    /// this process.
    #[must_use]
    pub fn ephemeral() -> Self {
        Self::with_ephemeral_key(&Self::generate_key())
    }

    /// Box bound to the process-wide ephemeral key, generated on first use.
    ///
    /// Every call in one process returns a box over the same key, so separate
    /// stores and managers can read each other's caches.
    #[must_use]
    pub fn process_ephemeral() -> Self {
        Self::with_ephemeral_key(PROCESS_KEY.get_or_init(Self::generate_key))
    }

    fn with_ephemeral_key(key: &[u8; KEY_LEN]) -> Self {
        let cipher = Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(key));
        Self { cipher, fingerprint: fingerprint(key), ephemeral: true }
    }

    /// Resolve the cache cipher for this process.
    ///
    /// - `Some(material)` that decodes: box bound to that key.
    /// - `None` or blank: the process-wide ephemeral key, logged as a
    ///   warning the first time it is generated.
    /// - `Some(material)` that does not decode: `None`, so the caller stores
    ///   the cache in plaintext for this session. Logged at error level.
    #[must_use]
    pub fn for_session(material: Option<&str>) -> Option<Self> {
        match material.map(str::trim).filter(|m| !m.is_empty()) {
            Some(material) => match Self::from_encoded_key(material) {
                Ok(sealed) => Some(sealed),
                Err(e) => {
                    error!(
                        error = %e,
                        "token encryption key is invalid; token cache encryption is DISABLED for this session"
                    );
                    None
                }
            },
            None => {
                let first_use = PROCESS_KEY.get().is_none();
                let sealed = Self::process_ephemeral();
                if first_use {
                    warn!(
                        fingerprint = %sealed.fingerprint,
                        "no token encryption key configured; using an ephemeral key, cached tokens will not survive a restart"
                    );
                } else {
                    debug!(fingerprint = %sealed.fingerprint, "reusing process ephemeral key");
                }
                Some(sealed)
            }
        }
    }

    /// Generate a random 32-byte key.
    #[must_use]
    pub fn generate_key() -> [u8; KEY_LEN] {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        key
    }

    /// Generate a random key and return it in the encoded form accepted by
    /// [`CryptoBox::from_encoded_key`].
    #[must_use]
    pub fn generate_encoded_key() -> String {
        URL_SAFE.encode(Self::generate_key())
    }

    /// Short, non-reversible identifier for the key, safe to log.
    #[must_use]
    pub fn key_fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Whether the key was generated for this process only.
    #[must_use]
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Seal `plaintext` into an ASCII envelope.
    ///
    /// # Errors
    /// Returns [`CryptoError::Encrypt`] if the cipher fails.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

        let envelope =
            EncryptedData { nonce: nonce.to_vec(), ciphertext, algorithm: ALGORITHM.to_string() };
        let serialized =
            serde_json::to_vec(&envelope).map_err(|e| CryptoError::Encrypt(e.to_string()))?;

        Ok(STANDARD.encode(serialized).into_bytes())
    }

    /// Open an envelope produced by [`CryptoBox::encrypt`].
    ///
    /// # Errors
    /// - [`CryptoError::Authentication`] for a wrong key or tampered data.
    /// - [`CryptoError::Malformed`] if `envelope` is not an envelope.
    pub fn decrypt(&self, envelope: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let text = std::str::from_utf8(envelope)
            .map_err(|_| CryptoError::Malformed("envelope is not ASCII".to_string()))?;
        let decoded = STANDARD
            .decode(text.trim())
            .map_err(|e| CryptoError::Malformed(format!("base64 decode failed: {e}")))?;
        let data: EncryptedData = serde_json::from_slice(&decoded)
            .map_err(|e| CryptoError::Malformed(format!("envelope is not valid JSON: {e}")))?;

        if data.algorithm != ALGORITHM {
            return Err(CryptoError::Malformed(format!("unsupported algorithm: {}", data.algorithm)));
        }
        if data.nonce.len() != NONCE_LEN {
            return Err(CryptoError::Malformed(format!(
                "nonce must be {NONCE_LEN} bytes, got {}",
                data.nonce.len()
            )));
        }

        self.cipher
            .decrypt(Nonce::from_slice(&data.nonce), data.ciphertext.as_ref())
            .map_err(|_| CryptoError::Authentication)
    }
}

fn decode_key(material: &str) -> Result<Vec<u8>, CryptoError> {
    let material = material.trim();
    let decoded = URL_SAFE
        .decode(material)
        .or_else(|_| URL_SAFE_NO_PAD.decode(material))
        .or_else(|_| STANDARD.decode(material))
        .map_err(|e| CryptoError::InvalidKey(format!("key is not base64: {e}")))?;

    if decoded.len() != KEY_LEN {
        return Err(CryptoError::InvalidKey(format!(
            "key must decode to {KEY_LEN} bytes, got {}",
            decoded.len()
        )));
    }
    Ok(decoded)
}

fn fingerprint(key: &[u8]) -> String {
    let digest = Sha256::digest(key);
    URL_SAFE_NO_PAD.encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    //! Unit tests for crypto::encryption.
    use super::*;

    fn sealed() -> CryptoBox {
        CryptoBox::new(&CryptoBox::generate_key()).unwrap()
    }

    #[test]
    fn new_rejects_invalid_key_size() {
        let result = CryptoBox::new(&[0u8; 16]);
        assert!(matches!(result, Err(CryptoError::InvalidKey(_))));
    }

    /// Validates the round trip over payloads of several shapes, including
    /// the empty payload and non-UTF-8 bytes.
    #[test]
    fn encrypt_and_decrypt_round_trip() {
        let sealed = sealed();
        let payloads: [&[u8]; 4] = [b"", b"hello world", &[0xff, 0x00, 0x9c], &[b'x'; 4096]];

        for plaintext in payloads {
            let envelope = sealed.encrypt(plaintext).unwrap();
            assert_eq!(sealed.decrypt(&envelope).unwrap(), plaintext);
        }
    }

    #[test]
    fn envelope_is_not_json() {
        let envelope = sealed().encrypt(b"{\"a\":1}").unwrap();
        assert!(serde_json::from_slice::<serde_json::Value>(&envelope).is_err());
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let envelope = sealed().encrypt(b"secret").unwrap();
        let other = sealed();

        assert!(matches!(other.decrypt(&envelope), Err(CryptoError::Authentication)));
    }

    /// Validates that flipping a single ciphertext bit yields an
    /// authentication failure rather than a wrong plaintext.
    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let sealed = sealed();
        let envelope = sealed.encrypt(b"secret payload").unwrap();

        let decoded = STANDARD.decode(&envelope).unwrap();
        let mut data: EncryptedData = serde_json::from_slice(&decoded).unwrap();
        data.ciphertext[0] ^= 0x01;
        let tampered = STANDARD.encode(serde_json::to_vec(&data).unwrap()).into_bytes();

        assert!(matches!(sealed.decrypt(&tampered), Err(CryptoError::Authentication)));
    }

    #[test]
    fn garbage_is_malformed_not_authentication() {
        let sealed = sealed();
        assert!(matches!(sealed.decrypt(b"not an envelope!"), Err(CryptoError::Malformed(_))));
        assert!(matches!(sealed.decrypt(&[0xff, 0xfe]), Err(CryptoError::Malformed(_))));
    }

    #[test]
    fn encoded_key_round_trip() {
        let encoded = CryptoBox::generate_encoded_key();
        let a = CryptoBox::from_encoded_key(&encoded).unwrap();
        let b = CryptoBox::from_encoded_key(&encoded).unwrap();

        let envelope = a.encrypt(b"shared").unwrap();
        assert_eq!(b.decrypt(&envelope).unwrap(), b"shared");
        assert_eq!(a.key_fingerprint(), b.key_fingerprint());
    }

    #[test]
    fn for_session_resolves_key_material() {
        assert!(CryptoBox::for_session(None).is_some_and(|b| b.is_ephemeral()));
        assert!(CryptoBox::for_session(Some("   ")).is_some_and(|b| b.is_ephemeral()));
        assert!(CryptoBox::for_session(Some("too-short")).is_none());

        let encoded = CryptoBox::generate_encoded_key();
        let configured = CryptoBox::for_session(Some(&encoded)).unwrap();
        assert!(!configured.is_ephemeral());
    }

    /// Validates that keyless sessions share one key per process.
    ///
    /// Assertions:
    /// - Two keyless sessions decrypt each other's envelopes.
    /// - `ephemeral()` still yields an unrelated key.
    #[test]
    fn keyless_sessions_share_process_key() {
        let first = CryptoBox::for_session(None).expect("first session");
        let second = CryptoBox::for_session(Some("")).expect("second session");
        assert_eq!(first.key_fingerprint(), second.key_fingerprint());

        let envelope = first.encrypt(b"cache").expect("encrypt");
        assert_eq!(second.decrypt(&envelope).expect("decrypt"), b"cache");

        let unrelated = CryptoBox::ephemeral();
        assert!(matches!(unrelated.decrypt(&envelope), Err(CryptoError::Authentication)));
    }

    #[test]
    fn debug_redacts_key() {
        let rendered = format!("{:?}", sealed());
        assert!(rendered.contains("[REDACTED]"));
    }
}
