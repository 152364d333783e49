//! Wisp Core Library
//!
//! Cryptographic building blocks for the Wisp encrypted-session protocol.
//!
//! # Modules
//!
//! - [`keys`]: X25519 node key pair, key agreement and node identifiers
//! - [`channel`]: XChaCha20-Poly1305 sealing of application payloads
//! - [`error`]: Error types

pub mod channel;
pub mod error;
pub mod keys;

pub use channel::{decrypt, encrypt, SessionKey};
pub use error::{Error, Result};
pub use keys::{identifier, KeyPair, NodeId, PublicKey};
