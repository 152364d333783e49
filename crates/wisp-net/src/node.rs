//! Node assembly: transport, protocol, sweeper and bootstrap

use crate::handshake::{HandshakeProtocol, KeyPinning};
use crate::peer::{ExpiryPolicy, PeerStore, PeerSummary};
use crate::transport::{Transport, TransportError, TransportEvent};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use wisp_core::{KeyPair, NodeId, PublicKey};

/// Runtime settings for a node
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Local endpoint to bind
    pub bind: SocketAddr,
    /// Rendezvous address contacted once at startup
    pub bootstrap: Option<SocketAddr>,
    /// Delay before contacting the bootstrap address
    pub bootstrap_delay: Duration,
    /// Maximum datagrams handled concurrently
    pub max_inflight: usize,
    /// Peer time-to-live per state
    pub expiry: ExpiryPolicy,
    /// How often expired peers are swept
    pub sweep_interval: Duration,
    /// Key substitution policy
    pub pinning: KeyPinning,
    /// Capacity of the event channel
    pub event_buffer: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 0)),
            bootstrap: None,
            bootstrap_delay: Duration::from_millis(500),
            max_inflight: 256,
            expiry: ExpiryPolicy::default(),
            sweep_interval: Duration::from_secs(15),
            pinning: KeyPinning::Strict,
            event_buffer: 256,
        }
    }
}

/// Result of one broadcast
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Established peers the payload was sealed for
    pub targets: usize,
    /// Datagrams the socket accepted
    pub sent: usize,
}

impl BroadcastReport {
    pub fn failed(&self) -> usize {
        self.targets - self.sent
    }
}

/// Cloneable handle to a running node
#[derive(Clone)]
pub struct NodeHandle {
    transport: Arc<Transport>,
    protocol: Arc<HandshakeProtocol>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl NodeHandle {
    pub fn node_id(&self) -> NodeId {
        self.protocol.node_id()
    }

    pub fn public_key(&self) -> PublicKey {
        self.protocol.public_key()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// Send a handshake init to `addr`
    pub async fn connect(&self, addr: SocketAddr) -> Result<(), TransportError> {
        let init = self.protocol.initiate(addr);
        self.transport.send(addr, &init).await
    }

    /// Encrypt and send `payload` to every established peer
    pub async fn broadcast(&self, payload: &[u8]) -> BroadcastReport {
        let sealed = self.protocol.seal_broadcast(payload);
        let mut report = BroadcastReport {
            targets: sealed.len(),
            sent: 0,
        };
        for (addr, message) in sealed {
            if self.transport.send_logged(addr, &message).await {
                report.sent += 1;
            }
        }
        report
    }

    pub fn peers(&self) -> Vec<PeerSummary> {
        self.protocol
            .peers()
            .list()
            .iter()
            .map(PeerSummary::from)
            .collect()
    }

    /// Stop all node tasks and wait for in-flight handlers
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}

/// Bind the transport and spawn the receive loop, sweeper and bootstrap task
pub async fn start_node(
    config: NodeConfig,
    keys: KeyPair,
) -> Result<(NodeHandle, mpsc::Receiver<TransportEvent>), TransportError> {
    let transport = Arc::new(Transport::bind(config.bind).await?);
    let peers = Arc::new(PeerStore::new());
    let protocol = Arc::new(HandshakeProtocol::new(keys, peers.clone(), config.pinning));
    let (event_tx, event_rx) = mpsc::channel(config.event_buffer);

    let handle = NodeHandle {
        transport: transport.clone(),
        protocol: protocol.clone(),
        shutdown: CancellationToken::new(),
        tasks: TaskTracker::new(),
    };

    info!(
        node_id = %handle.node_id(),
        addr = %handle.local_addr(),
        "node started"
    );

    handle.tasks.spawn(transport.run(
        protocol,
        event_tx,
        config.max_inflight,
        handle.shutdown.clone(),
    ));

    handle.tasks.spawn(sweep_expired(
        peers,
        config.expiry,
        config.sweep_interval,
        handle.shutdown.clone(),
    ));

    if let Some(bootstrap) = config.bootstrap {
        handle
            .tasks
            .spawn(bootstrap_once(handle.clone(), bootstrap, config.bootstrap_delay));
    }

    Ok((handle, event_rx))
}

async fn sweep_expired(
    peers: Arc<PeerStore>,
    policy: ExpiryPolicy,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let evicted = peers.evict_expired(&policy, Instant::now());
                for addr in &evicted {
                    debug!(peer = %addr, "peer expired");
                }
                if !evicted.is_empty() {
                    info!("Evicted {} idle peers", evicted.len());
                }
            }
        }
    }
}

async fn bootstrap_once(handle: NodeHandle, bootstrap: SocketAddr, delay: Duration) {
    tokio::select! {
        _ = handle.shutdown.cancelled() => return,
        _ = sleep(delay) => {}
    }

    if is_own_address(bootstrap, handle.local_addr()) {
        debug!("Bootstrap address is our own, skipping");
        return;
    }

    info!("Bootstrapping via {}", bootstrap);
    if let Err(e) = handle.connect(bootstrap).await {
        warn!(peer = %bootstrap, error = %e, "bootstrap unreachable, continuing with no peers");
    }
}

/// Whether `target` reaches our own socket: an exact match, or loopback on
/// our port when bound to the unspecified address
fn is_own_address(target: SocketAddr, local: SocketAddr) -> bool {
    if target == local {
        return true;
    }
    local.ip().is_unspecified() && target.port() == local.port() && target.ip().is_loopback()
}
