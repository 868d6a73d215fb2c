//! Cryptographic utilities for cookies and the login handshake
//!
//! This module provides the primitives that must be implemented correctly to
//! keep cookies opaque and unforgeable and to prevent timing side channels.

use aes_gcm::aead::{rand_core::RngCore, Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Version prefix of sealed values
const SEALED_PREFIX: &str = "v1.";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Validated master key material for cookie sealing.
///
/// Purpose-specific keys are derived with HMAC-SHA256 so the session cookie
/// and the pending-login cookie never share an encryption key.
#[derive(Clone)]
pub struct CookieKey {
    key_bytes: Vec<u8>,
}

impl CookieKey {
    /// Minimum allowed key length in bytes (256 bits)
    pub const MIN_KEY_LENGTH: usize = 32;

    /// Create a new cookie key from bytes.
    ///
    /// # Errors
    /// Returns error if key is too short (less than 32 bytes).
    pub fn new(key: impl AsRef<[u8]>) -> Result<Self, CookieKeyError> {
        let key_bytes = key.as_ref();
        if key_bytes.len() < Self::MIN_KEY_LENGTH {
            return Err(CookieKeyError::KeyTooShort {
                actual: key_bytes.len(),
                minimum: Self::MIN_KEY_LENGTH,
            });
        }
        Ok(Self {
            key_bytes: key_bytes.to_vec(),
        })
    }

    /// Derive a sealer for one purpose (e.g. `"session"`, `"login"`)
    pub fn sealer(&self, purpose: &str) -> CookieSealer {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&self.key_bytes)
            .expect("HMAC accepts keys of any length");
        mac.update(b"portcullis-cookie:");
        mac.update(purpose.as_bytes());
        let derived: [u8; 32] = mac.finalize().into_bytes().into();
        CookieSealer {
            cipher: Aes256Gcm::new(&derived.into()),
        }
    }
}

impl std::fmt::Debug for CookieKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieKey")
            .field("key_length", &self.key_bytes.len())
            .finish_non_exhaustive()
    }
}

/// Errors that can occur when creating a cookie key
#[derive(Debug, Clone, thiserror::Error)]
pub enum CookieKeyError {
    #[error("cookie key too short: got {actual} bytes, need at least {minimum}")]
    KeyTooShort { actual: usize, minimum: usize },
}

/// Failure to open a sealed value. Deliberately carries no detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("sealed value rejected")]
pub struct OpenError;

/// AES-256-GCM sealing of JSON values into URL-safe strings.
///
/// Format: `v1.` + base64url(nonce || ciphertext || tag).
#[derive(Clone)]
pub struct CookieSealer {
    cipher: Aes256Gcm,
}

impl CookieSealer {
    /// Serialize and encrypt a value
    pub fn seal<T: Serialize>(&self, value: &T) -> Result<String, serde_json::Error> {
        let plaintext = serde_json::to_vec(value)?;
        Ok(self.seal_bytes(&plaintext))
    }

    /// Encrypt raw bytes
    pub fn seal_bytes(&self, plaintext: &[u8]) -> String {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .expect("AES-GCM encryption of an in-memory buffer cannot fail");

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        format!("{SEALED_PREFIX}{}", URL_SAFE_NO_PAD.encode(out))
    }

    /// Decrypt and deserialize a value.
    ///
    /// Every failure (bad prefix, bad encoding, wrong key, tampering, bad
    /// JSON) is the same [`OpenError`].
    pub fn open<T: DeserializeOwned>(&self, sealed: &str) -> Result<T, OpenError> {
        let plaintext = self.open_bytes(sealed)?;
        serde_json::from_slice(&plaintext).map_err(|_| OpenError)
    }

    /// Decrypt raw bytes
    pub fn open_bytes(&self, sealed: &str) -> Result<Vec<u8>, OpenError> {
        let encoded = sealed.strip_prefix(SEALED_PREFIX).ok_or(OpenError)?;
        let raw = URL_SAFE_NO_PAD.decode(encoded).map_err(|_| OpenError)?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(OpenError);
        }

        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| OpenError)
    }
}

impl std::fmt::Debug for CookieSealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieSealer").finish_non_exhaustive()
    }
}

/// Constant-time string comparison.
///
/// Lengths are not secret; contents are compared without early exit.
#[inline]
pub fn constant_time_str_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Random alphanumeric token (state, nonce, PKCE verifier)
pub fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// PKCE S256 code challenge for a verifier
pub fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// SHA-256 fingerprint of a sensitive value, safe to log
pub fn fingerprint(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    hex::encode(&digest[..8])
}
