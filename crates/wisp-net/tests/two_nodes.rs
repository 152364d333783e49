//! End-to-end session setup between two nodes over loopback

use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use wisp_core::KeyPair;
use wisp_net::{
    start_node, ExpiryPolicy, KeyPinning, NodeConfig, NodeHandle, PeerStatus, TransportEvent,
};

fn loopback() -> NodeConfig {
    NodeConfig {
        bind: "127.0.0.1:0".parse().unwrap(),
        ..NodeConfig::default()
    }
}

async fn spawn() -> (NodeHandle, mpsc::Receiver<TransportEvent>) {
    start_node(loopback(), KeyPair::generate().unwrap())
        .await
        .unwrap()
}

async fn next_event(events: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
    timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

fn status_of(node: &NodeHandle, other: &NodeHandle) -> Option<PeerStatus> {
    node.peers()
        .into_iter()
        .find(|p| p.address == other.local_addr())
        .map(|p| p.status)
}

#[tokio::test]
async fn test_session_setup_and_exchange() {
    let (alice, mut alice_events) = spawn().await;
    let (bob, mut bob_events) = spawn().await;

    alice.connect(bob.local_addr()).await.unwrap();
    match next_event(&mut alice_events).await {
        TransportEvent::PeerEstablished { addr, node_id } => {
            assert_eq!(addr, bob.local_addr());
            assert_eq!(node_id, bob.node_id());
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(status_of(&alice, &bob), Some(PeerStatus::Established));
    assert_eq!(status_of(&bob, &alice), Some(PeerStatus::KeyReceived));

    // Bob has no session yet; this message is dropped and bob re-handshakes
    assert_eq!(alice.broadcast(b"lost").await.sent, 1);
    match next_event(&mut bob_events).await {
        TransportEvent::PeerEstablished { addr, node_id } => {
            assert_eq!(addr, alice.local_addr());
            assert_eq!(node_id, alice.node_id());
        }
        other => panic!("unexpected event {:?}", other),
    }

    assert_eq!(alice.broadcast(b"hello bob").await.sent, 1);
    match next_event(&mut bob_events).await {
        TransportEvent::MessageReceived { from, payload } => {
            assert_eq!(from, alice.local_addr());
            assert_eq!(&payload[..], b"hello bob");
        }
        other => panic!("unexpected event {:?}", other),
    }

    assert_eq!(bob.broadcast(b"hello alice").await.sent, 1);
    match next_event(&mut alice_events).await {
        TransportEvent::MessageReceived { from, payload } => {
            assert_eq!(from, bob.local_addr());
            assert_eq!(&payload[..], b"hello alice");
        }
        other => panic!("unexpected event {:?}", other),
    }

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn test_short_handshake_creates_no_peer() {
    let (node, _events) = spawn().await;
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    client
        .send_to(&[0x01, 1, 2, 3, 4, 5], node.local_addr())
        .await
        .unwrap();

    let mut buf = [0u8; 64];
    assert!(timeout(Duration::from_millis(200), client.recv_from(&mut buf))
        .await
        .is_err());
    assert!(node.peers().is_empty());
    node.shutdown().await;
}

#[tokio::test]
async fn test_restarted_peer_resynchronizes_with_replace_policy() {
    let replace = NodeConfig {
        pinning: KeyPinning::Replace,
        ..loopback()
    };
    let (alice, mut alice_events) = start_node(replace, KeyPair::generate().unwrap())
        .await
        .unwrap();
    let (bob, _bob_events) = spawn().await;

    alice.connect(bob.local_addr()).await.unwrap();
    next_event(&mut alice_events).await;

    // Bob restarts on the same address with a fresh key
    let bob_addr = bob.local_addr();
    bob.shutdown().await;
    drop(bob);
    sleep(Duration::from_millis(50)).await;
    let (bob, mut bob_events) = start_node(
        NodeConfig {
            bind: bob_addr,
            ..NodeConfig::default()
        },
        KeyPair::generate().unwrap(),
    )
    .await
    .unwrap();

    bob.connect(alice.local_addr()).await.unwrap();
    match next_event(&mut bob_events).await {
        TransportEvent::PeerEstablished { node_id, .. } => assert_eq!(node_id, alice.node_id()),
        other => panic!("unexpected event {:?}", other),
    }

    // Alice learned the new key and fell back to key-received
    assert_eq!(status_of(&alice, &bob), Some(PeerStatus::KeyReceived));
    let view = alice
        .peers()
        .into_iter()
        .find(|p| p.address == bob_addr)
        .unwrap();
    assert_eq!(view.node_id, Some(bob.node_id()));

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn test_restarted_peer_recovers_after_expiry_with_strict_policy() {
    let strict = NodeConfig {
        pinning: KeyPinning::Strict,
        expiry: ExpiryPolicy {
            pending_ttl: Duration::from_millis(300),
            established_ttl: Duration::from_millis(600),
        },
        sweep_interval: Duration::from_millis(50),
        ..loopback()
    };
    let (alice, mut alice_events) = start_node(strict, KeyPair::generate().unwrap())
        .await
        .unwrap();
    let (bob, _bob_events) = spawn().await;
    let old_id = bob.node_id();

    alice.connect(bob.local_addr()).await.unwrap();
    next_event(&mut alice_events).await;

    let bob_addr = bob.local_addr();
    bob.shutdown().await;
    drop(bob);
    sleep(Duration::from_millis(50)).await;
    let (bob, mut bob_events) = start_node(
        NodeConfig {
            bind: bob_addr,
            ..NodeConfig::default()
        },
        KeyPair::generate().unwrap(),
    )
    .await
    .unwrap();

    // The new key is refused while the old record is pinned
    bob.connect(alice.local_addr()).await.unwrap();
    assert!(timeout(Duration::from_millis(150), bob_events.recv())
        .await
        .is_err());
    let view = alice
        .peers()
        .into_iter()
        .find(|p| p.address == bob_addr)
        .unwrap();
    assert_eq!(view.node_id, Some(old_id));

    // Rejected handshakes do not refresh the record, so it expires
    timeout(Duration::from_secs(3), async {
        while !alice.peers().is_empty() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("stale peer was never evicted");

    bob.connect(alice.local_addr()).await.unwrap();
    match next_event(&mut bob_events).await {
        TransportEvent::PeerEstablished { node_id, .. } => assert_eq!(node_id, alice.node_id()),
        other => panic!("unexpected event {:?}", other),
    }
    let view = alice
        .peers()
        .into_iter()
        .find(|p| p.address == bob_addr)
        .unwrap();
    assert_eq!(view.node_id, Some(bob.node_id()));
    assert_eq!(view.status, PeerStatus::KeyReceived);

    alice.shutdown().await;
    bob.shutdown().await;
}
