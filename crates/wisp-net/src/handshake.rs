//! Handshake state machine
//!
//! Per peer: `Unknown` → `KeyReceived` → `Established`.
//!
//! - init from A: store A's key (`KeyReceived`), reply with our key
//! - response from A: derive the session key (`Established`), no reply;
//!   unsolicited responses re-initiate instead
//! - encrypted from A: decrypt if `Established`, otherwise re-initiate
//!
//! [`HandshakeProtocol::handle`] performs the state transition and returns
//! what the transport should do next; it never touches the socket.

use crate::framing::{Message, MessageType};
use crate::peer::{Peer, PeerStore, SessionState};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use wisp_core::{KeyPair, NodeId, PublicKey};

/// Handshake errors. Each one drops the offending datagram.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] wisp_core::Error),
    #[error("Public key from {0} does not match the pinned key")]
    KeyMismatch(SocketAddr),
    #[error("Handshake from {0} carries our own public key")]
    OwnKey(SocketAddr),
}

/// What to do when a handshake carries a different key than the one on record
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum KeyPinning {
    /// Keep the first key seen for an address and reject others
    #[default]
    Strict,
    /// Replace the key and restart the session
    Replace,
}

/// Result of handling one message
#[derive(Debug)]
pub enum Outcome {
    /// Send this message back to the source address
    Reply(Message),
    /// The peer just became established
    Established { node_id: NodeId },
    /// Authenticated application payload
    Delivered(Vec<u8>),
    /// Accepted, nothing further to do
    Unchanged,
}

/// Drives key exchange for every peer in the store
pub struct HandshakeProtocol {
    keys: KeyPair,
    peers: Arc<PeerStore>,
    pinning: KeyPinning,
}

impl HandshakeProtocol {
    pub fn new(keys: KeyPair, peers: Arc<PeerStore>, pinning: KeyPinning) -> Self {
        Self {
            keys,
            peers,
            pinning,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.keys.public_key()
    }

    pub fn node_id(&self) -> NodeId {
        self.keys.node_id()
    }

    pub fn peers(&self) -> &Arc<PeerStore> {
        &self.peers
    }

    /// Start a handshake toward `address`
    pub fn initiate(&self, address: SocketAddr) -> Message {
        self.peers.get_or_create(address);
        Message::handshake_init(&self.keys.public_key())
    }

    /// Apply one received message from `from`
    pub fn handle(&self, from: SocketAddr, message: &Message) -> Result<Outcome, HandshakeError> {
        match message.message_type {
            MessageType::HandshakeInit => self.on_init(from, &message.payload),
            MessageType::HandshakeResponse => self.on_response(from, &message.payload),
            MessageType::Encrypted => self.on_encrypted(from, &message.payload),
        }
    }

    fn on_init(&self, from: SocketAddr, payload: &[u8]) -> Result<Outcome, HandshakeError> {
        let remote = PublicKey::from_slice(payload)?;
        self.reject_own_key(from, &remote)?;
        let pinning = self.pinning;

        self.peers.upsert(from, |peer| {
            // A repeated init under the current key keeps the session
            let same_session = matches!(
                &peer.state,
                SessionState::Established { remote_key, .. } if *remote_key == remote
            );
            if !same_session {
                check_pinned(peer, &remote, pinning)?;
                peer.state = SessionState::KeyReceived { remote_key: remote };
            }
            peer.touch();
            Ok::<_, HandshakeError>(())
        })?;

        debug!(peer = %from, node_id = %remote.node_id(), "handshake init received");
        Ok(Outcome::Reply(Message::handshake_response(
            &self.keys.public_key(),
        )))
    }

    fn on_response(&self, from: SocketAddr, payload: &[u8]) -> Result<Outcome, HandshakeError> {
        if self.peers.get(&from).is_none() {
            debug!(peer = %from, "unsolicited handshake response, re-initiating");
            return Ok(Outcome::Reply(self.initiate(from)));
        }

        let remote = PublicKey::from_slice(payload)?;
        self.reject_own_key(from, &remote)?;
        let session_key = self.keys.derive_shared_secret(&remote)?;
        let pinning = self.pinning;

        let transition = self.peers.update(&from, |peer| {
            check_pinned(peer, &remote, pinning)?;
            // A replaced key announces a new identity
            let newly_established =
                !peer.is_established() || peer.remote_public_key() != Some(&remote);
            peer.state = SessionState::Established {
                remote_key: remote,
                session_key,
            };
            peer.touch();
            Ok::<_, HandshakeError>(newly_established)
        });

        match transition {
            Some(Ok(true)) => {
                info!(peer = %from, node_id = %remote.node_id(), "session established");
                Ok(Outcome::Established {
                    node_id: remote.node_id(),
                })
            }
            Some(Ok(false)) => Ok(Outcome::Unchanged),
            Some(Err(e)) => Err(e),
            // Evicted between lookup and update
            None => Ok(Outcome::Reply(self.initiate(from))),
        }
    }

    fn on_encrypted(&self, from: SocketAddr, blob: &[u8]) -> Result<Outcome, HandshakeError> {
        let session_key = self
            .peers
            .get(&from)
            .and_then(|peer| peer.session_key().cloned());

        let Some(session_key) = session_key else {
            debug!(peer = %from, "encrypted message without session, re-initiating");
            return Ok(Outcome::Reply(self.initiate(from)));
        };

        let plaintext = wisp_core::decrypt(&session_key, blob)?;
        self.peers.update(&from, Peer::touch);
        Ok(Outcome::Delivered(plaintext))
    }

    /// Drop handshakes that loop back to this node.
    ///
    /// A keyless record left by our own connect attempt is removed; records
    /// holding a key are kept so a spoofed source cannot evict a real peer.
    fn reject_own_key(&self, from: SocketAddr, remote: &PublicKey) -> Result<(), HandshakeError> {
        if *remote != self.keys.public_key() {
            return Ok(());
        }
        self.peers.remove_if(&from, |peer| peer.remote_public_key().is_none());
        Err(HandshakeError::OwnKey(from))
    }

    /// Seal `plaintext` once per established peer
    pub fn seal_broadcast(&self, plaintext: &[u8]) -> Vec<(SocketAddr, Message)> {
        self.peers
            .list_established()
            .into_iter()
            .filter_map(|peer| {
                let session_key = peer.session_key()?;
                match wisp_core::encrypt(session_key, plaintext) {
                    Ok(blob) => Some((peer.address, Message::encrypted(blob))),
                    Err(e) => {
                        warn!(peer = %peer.address, error = %e, "failed to seal message");
                        None
                    }
                }
            })
            .collect()
    }
}

fn check_pinned(
    peer: &Peer,
    remote: &PublicKey,
    pinning: KeyPinning,
) -> Result<(), HandshakeError> {
    match peer.remote_public_key() {
        Some(pinned) if pinned != remote && pinning == KeyPinning::Strict => {
            Err(HandshakeError::KeyMismatch(peer.address))
        }
        _ => Ok(()),
    }
}
