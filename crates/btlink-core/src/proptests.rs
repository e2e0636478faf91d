//! Random operation sequences against the manager.
//!
//! After every operation the runtime is given a moment to let cancelled
//! workers exit, then the single-session invariants are checked.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use tokio::io::DuplexStream;

use crate::transport::mock::{stream_pair, DialOutcome, MockTransport};
use crate::{LinkConfig, LinkManager, LinkState, PeerAddr};

#[derive(Debug, Clone)]
enum Op {
    Start,
    Stop,
    Connect(u8, DialOutcome),
    Inbound(u8),
    Promote(u8),
}

fn outcome() -> impl Strategy<Value = DialOutcome> {
    prop_oneof![
        Just(DialOutcome::Accept),
        Just(DialOutcome::Fail),
        Just(DialOutcome::Hang),
    ]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Start),
        Just(Op::Stop),
        (0u8..3, outcome()).prop_map(|(p, o)| Op::Connect(p, o)),
        (0u8..3).prop_map(Op::Inbound),
        (0u8..3).prop_map(Op::Promote),
    ]
}

fn peer(n: u8) -> PeerAddr {
    PeerAddr::new([0x02, 0, 0, 0, 0, n])
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(3)).await;
}

async fn run(ops: Vec<Op>) {
    let mock = MockTransport::new();
    let (link, mut events) = LinkManager::new(Arc::new(mock.clone()), LinkConfig::new()).unwrap();
    // Far ends stay open so live sessions only end by cancellation.
    let mut remotes: Vec<DuplexStream> = Vec::new();

    for op in ops {
        match &op {
            Op::Start => link.start().unwrap(),
            Op::Stop => link.stop(),
            Op::Connect(p, outcome) => {
                mock.plan_dial(peer(*p), *outcome);
                link.connect(peer(*p));
            }
            Op::Inbound(p) => remotes.extend(mock.push_incoming(peer(*p))),
            Op::Promote(p) => {
                let (stream, remote) = stream_pair(peer(*p));
                remotes.push(remote);
                link.connected(stream);
            }
        }
        settle().await;
        while events.try_recv().is_ok() {}

        let stats = link.stats();
        let state = link.state();
        assert!(stats.live_sessions.get() <= 1, "two sessions after {op:?}");
        assert_eq!(
            stats.live_sessions.get() == 1,
            state == LinkState::Connected,
            "session/state mismatch after {op:?}"
        );
        assert_eq!(link.connected_peer().is_some(), state == LinkState::Connected);
        assert!(mock.open_listeners() <= 1, "duplicate listener after {op:?}");
        if matches!(op, Op::Stop) {
            assert_eq!(state, LinkState::Idle);
            assert_eq!(stats.live_workers.get(), 0, "worker survived stop");
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn never_more_than_one_session(ops in prop::collection::vec(op(), 1..12)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(run(ops));
    }
}
