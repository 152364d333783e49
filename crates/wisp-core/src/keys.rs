//! Node key pair and key agreement
//!
//! Every node generates one X25519 key pair per process. The public half is
//! carried in handshake messages; agreement with a remote public key yields
//! the symmetric [`SessionKey`] used by [`crate::channel`].

use crate::channel::{SessionKey, SESSION_KEY_LEN};
use crate::error::{Error, Result};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroizing;

/// Length of an encoded X25519 public key
pub const PUBLIC_KEY_LEN: usize = 32;

/// Number of public key bytes that make up a node identifier
pub const NODE_ID_LEN: usize = 8;

/// HKDF info prefix for session key derivation
const SESSION_INFO: &[u8] = b"wisp-session-v1";

/// Raw X25519 public key as carried on the wire
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a public key from a handshake payload
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; PUBLIC_KEY_LEN] = bytes.try_into().map_err(|_| {
            Error::MalformedKey(format!(
                "expected {} bytes, got {}",
                PUBLIC_KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    /// Display identifier for this key
    pub fn node_id(&self) -> NodeId {
        identifier(self)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

/// Short display label derived from a public key. Not authenticated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId([u8; NODE_ID_LEN]);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Derive the node identifier for a public key.
///
/// `NodeId = hex(public_key[..8])`
pub fn identifier(public_key: &PublicKey) -> NodeId {
    let mut id = [0u8; NODE_ID_LEN];
    id.copy_from_slice(&public_key.0[..NODE_ID_LEN]);
    NodeId(id)
}

/// The node's X25519 key pair, held for the lifetime of the process
#[derive(Clone)]
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a new key pair from the OS random source
    pub fn generate() -> Result<Self> {
        let mut seed = Zeroizing::new([0u8; 32]);
        OsRng
            .try_fill_bytes(&mut seed[..])
            .map_err(|e| Error::EntropyUnavailable(e.to_string()))?;
        Ok(Self::from_seed(&seed))
    }

    /// Create from seed bytes (for deterministic testing)
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let secret = StaticSecret::from(*seed);
        let public = PublicKey(X25519Public::from(&secret).to_bytes());
        Self { secret, public }
    }

    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    pub fn node_id(&self) -> NodeId {
        identifier(&self.public)
    }

    /// Agree on a session key with a remote public key.
    ///
    /// `session_key = HKDF-SHA256(ikm = X25519(secret, remote), info = "wisp-session-v1" || lo || hi)`
    /// where `lo`/`hi` are the two public keys in byte order, so both sides
    /// derive the same key.
    pub fn derive_shared_secret(&self, remote: &PublicKey) -> Result<SessionKey> {
        let shared = self.secret.diffie_hellman(&X25519Public::from(remote.0));
        if !shared.was_contributory() {
            return Err(Error::MalformedKey("low-order point".into()));
        }

        let (lo, hi) = if self.public.0 <= remote.0 {
            (&self.public.0, &remote.0)
        } else {
            (&remote.0, &self.public.0)
        };
        let mut info = Vec::with_capacity(SESSION_INFO.len() + 2 * PUBLIC_KEY_LEN);
        info.extend_from_slice(SESSION_INFO);
        info.extend_from_slice(lo);
        info.extend_from_slice(hi);

        let hkdf = Hkdf::<Sha256>::new(None, shared.as_bytes());
        let mut okm = Zeroizing::new([0u8; SESSION_KEY_LEN]);
        hkdf.expand(&info, &mut okm[..])
            .map_err(|_| Error::KeyDerivation)?;
        Ok(SessionKey::from_bytes(*okm))
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}
