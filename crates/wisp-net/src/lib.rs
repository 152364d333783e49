//! Networking layer for the Wisp protocol
//!
//! This crate provides:
//! - Datagram framing by leading message type byte
//! - The concurrent peer registry and its expiry policy
//! - The per-peer handshake state machine
//! - The UDP receive loop and node assembly

pub mod framing;
pub mod handshake;
pub mod node;
pub mod peer;
pub mod transport;

pub use framing::{FrameError, Message, MessageType};
pub use handshake::{HandshakeError, HandshakeProtocol, KeyPinning, Outcome};
pub use node::{start_node, BroadcastReport, NodeConfig, NodeHandle};
pub use peer::{ExpiryPolicy, Peer, PeerStatus, PeerStore, PeerSummary, SessionState};
pub use transport::{Transport, TransportError, TransportEvent};
