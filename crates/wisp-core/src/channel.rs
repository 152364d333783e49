//! Authenticated encryption of application payloads
//!
//! Blob layout: `nonce (24) || ciphertext || tag (16)`. Nonces are drawn
//! fresh from the OS random source for every call; XChaCha20's 192-bit
//! nonce space keeps random nonces collision-free in practice.

use crate::error::{Error, Result};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// XChaCha20-Poly1305 nonce length
pub const NONCE_LEN: usize = 24;

/// Poly1305 tag length
pub const TAG_LEN: usize = 16;

/// Session key length
pub const SESSION_KEY_LEN: usize = 32;

/// Symmetric key shared with one peer
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; SESSION_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Seal `plaintext` under `key` with a fresh random nonce
pub fn encrypt(key: &SessionKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key.0));

    let mut nonce = [0u8; NONCE_LEN];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|e| Error::EntropyUnavailable(e.to_string()))?;

    let sealed = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| Error::EncryptionFailed)?;

    let mut blob = Vec::with_capacity(NONCE_LEN + sealed.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&sealed);
    Ok(blob)
}

/// Open a blob produced by [`encrypt`].
///
/// Truncation, tampering and a wrong key all surface as
/// [`Error::AuthenticationFailed`].
pub fn decrypt(key: &SessionKey, blob: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < NONCE_LEN + TAG_LEN {
        return Err(Error::AuthenticationFailed);
    }
    let (nonce, sealed) = blob.split_at(NONCE_LEN);

    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key.0));
    cipher
        .decrypt(XNonce::from_slice(nonce), sealed)
        .map_err(|_| Error::AuthenticationFailed)
}
