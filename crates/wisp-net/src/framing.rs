//! Datagram framing
//!
//! Every message is a single UDP datagram:
//! - 1 byte: message type
//! - N bytes: payload (public key for handshakes, sealed blob for messages)

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use wisp_core::PublicKey;

/// Largest payload a single UDP datagram can carry over IPv4
pub const MAX_DATAGRAM_LEN: usize = 65_507;

/// Framing errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Empty datagram")]
    Empty,
    #[error("Unknown message type: {0:#04x}")]
    UnknownType(u8),
}

/// Message types
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Handshake initiation carrying the sender's public key
    HandshakeInit = 0x01,
    /// Handshake reply carrying the responder's public key
    HandshakeResponse = 0x02,
    /// Sealed application payload
    Encrypted = 0x03,
}

impl TryFrom<u8> for MessageType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::HandshakeInit),
            0x02 => Ok(Self::HandshakeResponse),
            0x03 => Ok(Self::Encrypted),
            other => Err(FrameError::UnknownType(other)),
        }
    }
}

/// A decoded datagram
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub message_type: MessageType,
    pub payload: Bytes,
}

impl Message {
    pub fn new(message_type: MessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            message_type,
            payload: payload.into(),
        }
    }

    pub fn handshake_init(public_key: &PublicKey) -> Self {
        Self::new(
            MessageType::HandshakeInit,
            Bytes::copy_from_slice(public_key.as_bytes()),
        )
    }

    pub fn handshake_response(public_key: &PublicKey) -> Self {
        Self::new(
            MessageType::HandshakeResponse,
            Bytes::copy_from_slice(public_key.as_bytes()),
        )
    }

    pub fn encrypted(blob: Vec<u8>) -> Self {
        Self::new(MessageType::Encrypted, blob)
    }

    /// Prepend the type byte and produce the datagram bytes
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + self.payload.len());
        buf.put_u8(self.message_type as u8);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Classify a datagram by its leading type byte
    pub fn decode(datagram: &[u8]) -> Result<Self, FrameError> {
        let (&type_byte, payload) = datagram.split_first().ok_or(FrameError::Empty)?;
        let message_type = MessageType::try_from(type_byte)?;
        Ok(Self::new(message_type, Bytes::copy_from_slice(payload)))
    }
}
