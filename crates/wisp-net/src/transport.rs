//! UDP transport and receive loop
//!
//! One loop reads datagrams and hands each to its own tracked task. A
//! semaphore bounds the number of in-flight handlers; once it is exhausted
//! the loop stops reading until a handler finishes.

use crate::framing::{Message, MAX_DATAGRAM_LEN};
use crate::handshake::{HandshakeError, HandshakeProtocol, Outcome};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use wisp_core::NodeId;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Bind failed on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
}

/// Event from the transport layer
#[derive(Debug)]
pub enum TransportEvent {
    /// Handshake completed with a peer
    PeerEstablished { addr: SocketAddr, node_id: NodeId },
    /// Authenticated message received from a peer
    MessageReceived { from: SocketAddr, payload: Bytes },
}

/// Datagram socket shared by the receive loop and all senders
pub struct Transport {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl Transport {
    /// Bind the local endpoint (`0.0.0.0:0` for an ephemeral port)
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = socket.local_addr()?;
        Ok(Self { socket, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Write one datagram; oversized payloads are left to the OS to reject
    pub async fn send(&self, to: SocketAddr, message: &Message) -> Result<(), TransportError> {
        let datagram = message.encode();
        self.socket.send_to(&datagram, to).await?;
        Ok(())
    }

    /// Send and log failures instead of returning them
    pub async fn send_logged(&self, to: SocketAddr, message: &Message) -> bool {
        match self.send(to, message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(peer = %to, error = %e, "send failed");
                false
            }
        }
    }

    /// Run the receive loop until `shutdown` fires
    pub async fn run(
        self: Arc<Self>,
        protocol: Arc<HandshakeProtocol>,
        event_tx: mpsc::Sender<TransportEvent>,
        max_inflight: usize,
        shutdown: CancellationToken,
    ) {
        let limiter = Arc::new(Semaphore::new(max_inflight));
        let handlers = TaskTracker::new();
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];

        info!("Transport listening on {}", self.local_addr);

        loop {
            let (len, from) = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        warn!(error = %e, "receive failed");
                        continue;
                    }
                },
            };

            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = limiter.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let datagram = Bytes::copy_from_slice(&buf[..len]);
            let transport = self.clone();
            let protocol = protocol.clone();
            let event_tx = event_tx.clone();
            let shutdown = shutdown.clone();
            handlers.spawn(async move {
                transport
                    .dispatch(&protocol, &event_tx, &shutdown, from, &datagram)
                    .await;
                drop(permit);
            });
        }

        handlers.close();
        handlers.wait().await;
        debug!("Transport receive loop stopped");
    }

    /// Classify one datagram and act on the protocol's decision
    async fn dispatch(
        &self,
        protocol: &HandshakeProtocol,
        event_tx: &mpsc::Sender<TransportEvent>,
        shutdown: &CancellationToken,
        from: SocketAddr,
        datagram: &[u8],
    ) {
        let message = match Message::decode(datagram) {
            Ok(message) => message,
            Err(e) => {
                debug!(peer = %from, error = %e, "ignoring datagram");
                return;
            }
        };

        match protocol.handle(from, &message) {
            Ok(Outcome::Reply(reply)) => {
                self.send_logged(from, &reply).await;
            }
            Ok(Outcome::Established { node_id }) => {
                let event = TransportEvent::PeerEstablished {
                    addr: from,
                    node_id,
                };
                emit(event_tx, shutdown, event).await;
            }
            Ok(Outcome::Delivered(payload)) => {
                let event = TransportEvent::MessageReceived {
                    from,
                    payload: payload.into(),
                };
                emit(event_tx, shutdown, event).await;
            }
            Ok(Outcome::Unchanged) => {}
            Err(HandshakeError::Crypto(wisp_core::Error::MalformedKey(reason))) => {
                debug!(peer = %from, %reason, "dropping handshake with malformed key");
            }
            Err(HandshakeError::OwnKey(_)) => {
                debug!(peer = %from, "dropping handshake from ourselves");
            }
            Err(e) => {
                warn!(peer = %from, error = %e, "dropping message");
            }
        }
    }
}

/// Forward an event; abandoned once shutdown starts
async fn emit(
    event_tx: &mpsc::Sender<TransportEvent>,
    shutdown: &CancellationToken,
    event: TransportEvent,
) {
    tokio::select! {
        _ = shutdown.cancelled() => debug!("shutting down, event dropped"),
        sent = event_tx.send(event) => {
            if sent.is_err() {
                debug!("event receiver closed, event dropped");
            }
        }
    }
}
