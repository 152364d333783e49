//! Error types for Wisp

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Wisp cryptographic error types
#[derive(Debug, Error)]
pub enum Error {
    /// Public key bytes are not usable for X25519 agreement
    #[error("malformed public key: {0}")]
    MalformedKey(String),

    /// Ciphertext blob failed to authenticate (tampered, truncated or wrong key)
    #[error("authentication failed")]
    AuthenticationFailed,

    /// The OS random source could not be read
    #[error("random source unavailable: {0}")]
    EntropyUnavailable(String),

    /// HKDF expansion of the shared secret failed
    #[error("session key derivation failed")]
    KeyDerivation,

    /// AEAD sealing failed
    #[error("encryption failed")]
    EncryptionFailed,
}
