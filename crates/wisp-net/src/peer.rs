//! Peer registry
//!
//! [`PeerStore`] is the only owner of per-peer session state. Callers get
//! cloned snapshots and mutate exclusively through [`PeerStore::update`] and
//! [`PeerStore::upsert`], which run under the write lock.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use wisp_core::{NodeId, PublicKey, SessionKey};

/// Session state of a single peer.
///
/// The session key only exists inside `Established`, so a peer can never
/// be observed with a key but no session or the other way around.
#[derive(Clone, Debug)]
pub enum SessionState {
    /// Record exists (local connect or re-initiation) but no key was seen yet
    Unknown,
    /// Remote public key known, no session key derived
    KeyReceived { remote_key: PublicKey },
    /// Session key derived, ready for encrypted traffic
    Established {
        remote_key: PublicKey,
        session_key: SessionKey,
    },
}

impl SessionState {
    pub fn remote_key(&self) -> Option<&PublicKey> {
        match self {
            Self::Unknown => None,
            Self::KeyReceived { remote_key } | Self::Established { remote_key, .. } => {
                Some(remote_key)
            }
        }
    }

    pub fn status(&self) -> PeerStatus {
        match self {
            Self::Unknown => PeerStatus::Unknown,
            Self::KeyReceived { .. } => PeerStatus::KeyReceived,
            Self::Established { .. } => PeerStatus::Established,
        }
    }
}

/// State label without key material
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerStatus {
    Unknown,
    KeyReceived,
    Established,
}

impl std::fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Unknown => "unknown",
            Self::KeyReceived => "key-received",
            Self::Established => "established",
        };
        f.write_str(label)
    }
}

/// One remote endpoint
#[derive(Clone, Debug)]
pub struct Peer {
    /// Transport address, the registry key
    pub address: SocketAddr,
    /// Handshake progress
    pub state: SessionState,
    /// When the record was created
    pub first_seen: Instant,
    /// Last accepted handshake or authenticated message
    pub last_seen: Instant,
}

impl Peer {
    pub fn new(address: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            address,
            state: SessionState::Unknown,
            first_seen: now,
            last_seen: now,
        }
    }

    pub fn remote_public_key(&self) -> Option<&PublicKey> {
        self.state.remote_key()
    }

    pub fn session_key(&self) -> Option<&SessionKey> {
        match &self.state {
            SessionState::Established { session_key, .. } => Some(session_key),
            _ => None,
        }
    }

    pub fn is_established(&self) -> bool {
        matches!(self.state, SessionState::Established { .. })
    }

    pub fn status(&self) -> PeerStatus {
        self.state.status()
    }

    pub fn node_id(&self) -> Option<NodeId> {
        self.remote_public_key().map(PublicKey::node_id)
    }

    /// Refresh last seen time
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn idle(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }
}

/// Time-to-live per session state
#[derive(Clone, Copy, Debug)]
pub struct ExpiryPolicy {
    /// TTL for `Unknown` and `KeyReceived` peers
    pub pending_ttl: Duration,
    /// TTL for `Established` peers
    pub established_ttl: Duration,
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self {
            pending_ttl: Duration::from_secs(60),
            established_ttl: Duration::from_secs(600),
        }
    }
}

impl ExpiryPolicy {
    pub fn is_expired(&self, peer: &Peer, now: Instant) -> bool {
        let ttl = if peer.is_established() {
            self.established_ttl
        } else {
            self.pending_ttl
        };
        peer.idle(now) > ttl
    }
}

/// Console-facing view of a peer
#[derive(Clone, Debug)]
pub struct PeerSummary {
    pub address: SocketAddr,
    pub status: PeerStatus,
    pub node_id: Option<NodeId>,
    pub idle: Duration,
}

impl From<&Peer> for PeerSummary {
    fn from(peer: &Peer) -> Self {
        Self {
            address: peer.address,
            status: peer.status(),
            node_id: peer.node_id(),
            idle: peer.idle(Instant::now()),
        }
    }
}

/// Concurrent address → peer registry
#[derive(Default)]
pub struct PeerStore {
    peers: RwLock<HashMap<SocketAddr, Peer>>,
}

impl PeerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the peer, creating an empty `Unknown` record if absent
    pub fn get_or_create(&self, address: SocketAddr) -> Peer {
        self.peers
            .write()
            .entry(address)
            .or_insert_with(|| Peer::new(address))
            .clone()
    }

    pub fn get(&self, address: &SocketAddr) -> Option<Peer> {
        self.peers.read().get(address).cloned()
    }

    /// Mutate an existing peer under exclusive access
    pub fn update<R>(
        &self,
        address: &SocketAddr,
        mutator: impl FnOnce(&mut Peer) -> R,
    ) -> Option<R> {
        self.peers.write().get_mut(address).map(mutator)
    }

    /// Remove the peer if `predicate` holds for it
    pub fn remove_if(&self, address: &SocketAddr, predicate: impl FnOnce(&Peer) -> bool) -> bool {
        let mut peers = self.peers.write();
        match peers.get(address) {
            Some(peer) if predicate(peer) => peers.remove(address).is_some(),
            _ => false,
        }
    }

    /// Create the peer if absent and mutate it within the same lock window
    pub fn upsert<R>(&self, address: SocketAddr, mutator: impl FnOnce(&mut Peer) -> R) -> R {
        let mut peers = self.peers.write();
        let peer = peers.entry(address).or_insert_with(|| Peer::new(address));
        mutator(peer)
    }

    /// Snapshot of established peers, safe to use for I/O after the lock drops
    pub fn list_established(&self) -> Vec<Peer> {
        self.peers
            .read()
            .values()
            .filter(|p| p.is_established())
            .cloned()
            .collect()
    }

    /// All peers, ordered by address
    pub fn list(&self) -> Vec<Peer> {
        let mut peers: Vec<_> = self.peers.read().values().cloned().collect();
        peers.sort_by_key(|p| p.address);
        peers
    }

    /// Remove peers idle beyond their state's TTL
    pub fn evict_expired(&self, policy: &ExpiryPolicy, now: Instant) -> Vec<SocketAddr> {
        let mut evicted = Vec::new();
        self.peers.write().retain(|addr, peer| {
            let expired = policy.is_expired(peer, now);
            if expired {
                evicted.push(*addr);
            }
            !expired
        });
        evicted
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use wisp_core::KeyPair;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn established(peer: &mut Peer) {
        let kp = KeyPair::from_seed(&[5; 32]);
        peer.state = SessionState::Established {
            remote_key: kp.public_key(),
            session_key: SessionKey::from_bytes([1; 32]),
        };
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let store = PeerStore::new();
        let a = store.get_or_create(addr(1000));
        let b = store.get_or_create(addr(1000));

        assert_eq!(store.len(), 1);
        assert_eq!(a.status(), PeerStatus::Unknown);
        assert_eq!(a.first_seen, b.first_seen);
    }

    #[test]
    fn test_update_absent_returns_none() {
        let store = PeerStore::new();
        assert!(store.update(&addr(1), |p| p.touch()).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_if_respects_predicate() {
        let store = PeerStore::new();
        store.get_or_create(addr(1));
        store.upsert(addr(2), established);

        assert!(!store.remove_if(&addr(2), |p| p.remote_public_key().is_none()));
        assert!(store.remove_if(&addr(1), |p| p.remote_public_key().is_none()));
        assert!(!store.remove_if(&addr(3), |_| true));
        assert_eq!(store.len(), 1);
        assert!(store.get(&addr(2)).unwrap().is_established());
    }

    #[test]
    fn test_upsert_creates_and_mutates() {
        let store = PeerStore::new();
        let kp = KeyPair::from_seed(&[9; 32]);

        store.upsert(addr(2), |p| {
            p.state = SessionState::KeyReceived {
                remote_key: kp.public_key(),
            }
        });

        let peer = store.get(&addr(2)).unwrap();
        assert_eq!(peer.status(), PeerStatus::KeyReceived);
        assert_eq!(peer.remote_public_key(), Some(&kp.public_key()));
        assert!(peer.session_key().is_none());
        assert_eq!(peer.node_id(), Some(kp.node_id()));
    }

    #[test]
    fn test_list_established_filters() {
        let store = PeerStore::new();
        store.get_or_create(addr(3));
        store.upsert(addr(4), established);

        let list = store.list_established();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].address, addr(4));
        assert!(list[0].session_key().is_some());
    }

    #[test]
    fn test_list_sorted() {
        let store = PeerStore::new();
        for port in [30, 10, 20] {
            store.get_or_create(addr(port));
        }
        let ports: Vec<_> = store.list().iter().map(|p| p.address.port()).collect();
        assert_eq!(ports, vec![10, 20, 30]);
    }

    #[test]
    fn test_evict_expired_by_state() {
        let store = PeerStore::new();
        store.get_or_create(addr(5));
        store.upsert(addr(6), established);

        let policy = ExpiryPolicy {
            pending_ttl: Duration::from_secs(10),
            established_ttl: Duration::from_secs(100),
        };

        let now = Instant::now();
        assert!(store.evict_expired(&policy, now).is_empty());

        let evicted = store.evict_expired(&policy, now + Duration::from_secs(11));
        assert_eq!(evicted, vec![addr(5)]);
        assert!(store.get(&addr(6)).is_some());

        let evicted = store.evict_expired(&policy, now + Duration::from_secs(101));
        assert_eq!(evicted, vec![addr(6)]);
        assert!(store.is_empty());
    }

    #[test]
    fn test_touch_defers_expiry() {
        let store = PeerStore::new();
        store.get_or_create(addr(7));
        let policy = ExpiryPolicy {
            pending_ttl: Duration::from_millis(50),
            established_ttl: Duration::from_millis(50),
        };

        std::thread::sleep(Duration::from_millis(60));
        store.update(&addr(7), Peer::touch);
        assert!(store.evict_expired(&policy, Instant::now()).is_empty());
    }

    #[test]
    fn test_concurrent_upserts() {
        let store = Arc::new(PeerStore::new());
        let handles: Vec<_> = (0..8u16)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..100u16 {
                        store.upsert(addr(t * 100 + i), |p| p.touch());
                        store.get_or_create(addr(i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(store.len(), 800);
    }
}
