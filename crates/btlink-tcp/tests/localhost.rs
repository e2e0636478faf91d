//! Integration tests: two LinkManagers over TCP on localhost.

use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use btlink_core::{
    LinkConfig, LinkEvent, LinkEvents, LinkManager, LinkState, PeerAddr, Transport, Uuid,
};
use btlink_tcp::{PeerEntry, PeerTable, TcpTransport};

const ALICE: PeerAddr = PeerAddr::new([0x0A, 0x11, 0xCE, 0x00, 0x00, 0x01]);
const BOB: PeerAddr = PeerAddr::new([0x0B, 0x0B, 0x00, 0x00, 0x00, 0x02]);
const CAROL: PeerAddr = PeerAddr::new([0x0C, 0xA7, 0x00, 0x00, 0x00, 0x03]);

struct Node {
    transport: Arc<TcpTransport>,
    link: LinkManager,
    events: LinkEvents,
}

fn node(addr: PeerAddr, table: PeerTable, config: LinkConfig) -> Node {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();

    let transport = Arc::new(
        TcpTransport::new(addr, "127.0.0.1:0".parse().unwrap(), table).unwrap(),
    );
    let dyn_transport: Arc<dyn Transport> = transport.clone();
    let (link, events) = LinkManager::new(dyn_transport, config).unwrap();
    Node {
        transport,
        link,
        events,
    }
}

/// Alice listening, Bob knowing where to find her.
fn pair() -> (Node, Node, SocketAddr) {
    let alice = node(ALICE, PeerTable::default(), LinkConfig::new());
    let alice_addr = alice.transport.bound_addr().unwrap();
    alice.link.start().unwrap();

    let mut table = PeerTable::default();
    table.upsert(PeerEntry::new(ALICE, alice_addr));
    let bob = node(BOB, table, LinkConfig::new());
    (alice, bob, alice_addr)
}

/// An address nothing listens on.
fn refused_addr() -> SocketAddr {
    let unused = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    unused.local_addr().unwrap()
}

async fn next_event(events: &mut LinkEvents) -> LinkEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("event timed out")
        .expect("event channel closed")
}

/// Collect inbound bytes until `len` have arrived; TCP may split them.
async fn recv_bytes(events: &mut LinkEvents, from: PeerAddr, len: usize) -> Vec<u8> {
    let mut received = Vec::new();
    while received.len() < len {
        match next_event(events).await {
            LinkEvent::BytesReceived { peer, data } => {
                assert_eq!(peer, from);
                received.extend_from_slice(&data);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
    received
}

async fn wait_for_state(link: &LinkManager, state: LinkState) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while link.state() != state {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("never reached {state}, stuck at {}", link.state()));
}

/// Bob dials Alice; both sides see the session and bytes flow both ways.
#[tokio::test]
async fn dial_and_exchange_bytes() {
    let (mut alice, mut bob, _) = pair();

    bob.link.connect(ALICE);
    assert_eq!(
        next_event(&mut bob.events).await,
        LinkEvent::PeerConnected { peer: ALICE }
    );
    assert_eq!(
        next_event(&mut alice.events).await,
        LinkEvent::PeerConnected { peer: BOB }
    );
    assert_eq!(alice.link.connected_peer(), Some(BOB));
    assert_eq!(bob.link.state(), LinkState::Connected);

    bob.link.write(b"hello alice").await;
    assert_eq!(recv_bytes(&mut alice.events, BOB, 11).await, b"hello alice");

    alice.link.write(b"hi bob").await;
    assert_eq!(recv_bytes(&mut bob.events, ALICE, 6).await, b"hi bob");

    assert_eq!(bob.link.stats().bytes_sent.get(), 11);
    assert_eq!(alice.link.stats().bytes_received.get(), 11);

    bob.link.stop();
    alice.link.stop();
}

/// Primary address refuses; the fallback address reaches Alice.
#[tokio::test]
async fn fallback_reaches_listener() {
    let mut alice = node(ALICE, PeerTable::default(), LinkConfig::new());
    let alice_addr = alice.transport.bound_addr().unwrap();
    alice.link.start().unwrap();

    let mut table = PeerTable::default();
    table.upsert(PeerEntry {
        fallback: Some(alice_addr),
        ..PeerEntry::new(ALICE, refused_addr())
    });
    let mut bob = node(BOB, table, LinkConfig::new());

    bob.link.connect(ALICE);
    assert_eq!(
        next_event(&mut bob.events).await,
        LinkEvent::PeerConnected { peer: ALICE }
    );
    assert_eq!(
        next_event(&mut alice.events).await,
        LinkEvent::PeerConnected { peer: BOB }
    );
    assert_eq!(bob.link.stats().connect_failures.get(), 0);
}

/// Bob hangs up; Alice reports the loss, listens again and takes a redial.
#[tokio::test]
async fn lost_peer_returns_to_listening() {
    let (mut alice, mut bob, _) = pair();

    bob.link.connect(ALICE);
    assert_eq!(
        next_event(&mut alice.events).await,
        LinkEvent::PeerConnected { peer: BOB }
    );
    assert_eq!(
        next_event(&mut bob.events).await,
        LinkEvent::PeerConnected { peer: ALICE }
    );

    bob.link.stop();
    assert_eq!(
        next_event(&mut alice.events).await,
        LinkEvent::ConnectionLost { peer: BOB }
    );
    wait_for_state(&alice.link, LinkState::Listening).await;
    assert_eq!(alice.link.stats().connections_lost.get(), 1);

    bob.link.connect(ALICE);
    assert_eq!(
        next_event(&mut alice.events).await,
        LinkEvent::PeerConnected { peer: BOB }
    );
}

/// While Alice is in a session nothing accepts on her port, so a third dial
/// is refused at once instead of waiting out the handshake in the backlog.
#[tokio::test]
async fn busy_peer_refuses_dials() {
    let (mut alice, mut bob, alice_addr) = pair();
    let mut table = PeerTable::default();
    table.upsert(PeerEntry::new(ALICE, alice_addr));
    let mut carol = node(CAROL, table, LinkConfig::new());

    bob.link.connect(ALICE);
    assert_eq!(
        next_event(&mut alice.events).await,
        LinkEvent::PeerConnected { peer: BOB }
    );
    assert_eq!(
        next_event(&mut bob.events).await,
        LinkEvent::PeerConnected { peer: ALICE }
    );
    tokio::time::timeout(Duration::from_secs(2), async {
        while alice.transport.is_listening() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Alice kept her socket open while connected");

    carol.link.connect(ALICE);
    let failed = tokio::time::timeout(Duration::from_secs(2), carol.events.recv())
        .await
        .expect("dial to a busy peer hung");
    assert_eq!(failed, Some(LinkEvent::ConnectFailed { peer: ALICE }));

    bob.link.stop();
    assert_eq!(
        next_event(&mut alice.events).await,
        LinkEvent::ConnectionLost { peer: BOB }
    );
    wait_for_state(&alice.link, LinkState::Listening).await;
    assert_eq!(alice.transport.bound_addr().unwrap(), alice_addr);

    // Carol's refused dial left nothing behind to be accepted later.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(alice.events.try_recv().is_err());
    assert_eq!(alice.link.state(), LinkState::Listening);

    wait_for_state(&carol.link, LinkState::Listening).await;
    carol.link.connect(ALICE);
    assert_eq!(
        next_event(&mut alice.events).await,
        LinkEvent::PeerConnected { peer: CAROL }
    );
}

/// Dialing a service Alice does not offer fails on Bob's side only.
#[tokio::test]
async fn foreign_service_is_refused() {
    let mut alice = node(ALICE, PeerTable::default(), LinkConfig::new());
    let alice_addr = alice.transport.bound_addr().unwrap();
    alice.link.start().unwrap();

    let mut table = PeerTable::default();
    table.upsert(PeerEntry::new(ALICE, alice_addr));
    let mut bob = node(
        BOB,
        table,
        LinkConfig::new().service_uuid(Uuid::new_v4()),
    );

    bob.link.connect(ALICE);
    assert_eq!(
        next_event(&mut bob.events).await,
        LinkEvent::ConnectFailed { peer: ALICE }
    );
    wait_for_state(&bob.link, LinkState::Listening).await;
    assert_eq!(alice.link.state(), LinkState::Listening);
    assert!(alice.events.try_recv().is_err());
}

#[tokio::test]
async fn unknown_peer_fails_dial() {
    let (_alice, mut bob, _) = pair();
    let stranger = PeerAddr::new([0xDE, 0xAD, 0, 0, 0, 0]);

    bob.link.connect(stranger);
    assert_eq!(
        next_event(&mut bob.events).await,
        LinkEvent::ConnectFailed { peer: stranger }
    );
}

/// Peer table read from a JSON file drives `saved_peers` and dialing.
#[tokio::test]
async fn peer_table_from_file() {
    let mut alice = node(ALICE, PeerTable::default(), LinkConfig::new());
    let alice_addr = alice.transport.bound_addr().unwrap();
    alice.link.start().unwrap();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"peers":[
            {{"addr":"{ALICE}","name":"alice","primary":"{alice_addr}"}},
            {{"addr":"0C:00:00:00:00:03","name":"carol","bonded":false,"primary":"{}"}}
        ]}}"#,
        refused_addr()
    )
    .unwrap();

    let table = PeerTable::load(file.path()).unwrap();
    let mut bob = node(BOB, table, LinkConfig::new());

    let saved = bob.link.saved_peers();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].label(), "alice");

    bob.link.connect(ALICE);
    assert_eq!(
        next_event(&mut bob.events).await,
        LinkEvent::PeerConnected { peer: ALICE }
    );
    assert_eq!(
        next_event(&mut alice.events).await,
        LinkEvent::PeerConnected { peer: BOB }
    );
}
