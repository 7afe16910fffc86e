// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tapmesh.dev

//! Destination-filter scenarios: selective fanout on the send side and
//! the am-I-a-target check on the receive side.

mod common;

use common::{read_tap_frames, tap_pair, wait_until, FakePeer};
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::time::Duration;
use tapmesh::{DstFilter, Handle, HandleConfig, Route};

/// Filter returning one fixed verdict for every frame.
struct FixedFilter {
    route: Route,
    targets: Vec<u16>,
}

impl FixedFilter {
    fn unicast(targets: &[u16]) -> Arc<Self> {
        Arc::new(Self {
            route: Route::Unicast,
            targets: targets.to_vec(),
        })
    }

    fn discard() -> Arc<Self> {
        Arc::new(Self {
            route: Route::Discard,
            targets: Vec::new(),
        })
    }
}

impl DstFilter for FixedFilter {
    fn route(&self, _payload: &[u8], _src_id: u16, targets: &mut Vec<u16>) -> Route {
        targets.extend_from_slice(&self.targets);
        self.route
    }
}

struct FilterRig {
    handle: Handle,
    app: std::os::unix::net::UnixDatagram,
    _engine: std::os::unix::net::UnixDatagram,
    peers: Vec<FakePeer>,
}

/// Engine node 1 with three peer hosts (2, 3, 4), one live link each.
fn rig_with_filter(filter: Arc<dyn DstFilter>) -> FilterRig {
    let (app, engine) = tap_pair();
    let handle = Handle::new(HandleConfig {
        node_id: 1,
        tap_fd: engine.as_raw_fd(),
        dst_filter: Some(filter),
    })
    .expect("handle");

    let mut peers = Vec::new();
    for peer_id in [2u16, 3, 4] {
        let peer = FakePeer::spawn(peer_id);
        handle.add_host(peer_id, "peer").expect("add host");
        handle
            .configure_link(peer_id, 0, "127.0.0.1:0".parse().unwrap(), peer.addr())
            .expect("configure");
        handle
            .set_link_timeouts(peer_id, 0, 200, 2000, 2048)
            .expect("timeouts");
        handle.set_link_enabled(peer_id, 0, true).expect("enable");
        peers.push(peer);
    }
    handle.set_forwarding(true);

    let up = wait_until(Duration::from_secs(5), || {
        [2u16, 3, 4].iter().all(|id| {
            handle.link_status(*id, 0).map(|s| s.connected).unwrap_or(false)
        })
    });
    assert!(up, "peer links never came up");
    std::thread::sleep(Duration::from_millis(300));

    FilterRig {
        handle,
        app,
        _engine: engine,
        peers,
    }
}

#[test]
fn test_unicast_fanout_excludes_unlisted_peer() {
    // peers 2 and 4 are targets; peer 3 must stay silent
    let rig = rig_with_filter(FixedFilter::unicast(&[2, 4]));

    for i in 0..3u8 {
        rig.app.send(&[i; 48]).expect("tap send");
    }

    let arrived = wait_until(Duration::from_secs(3), || {
        rig.peers[0].data_count() == 3 && rig.peers[2].data_count() == 3
    });
    assert!(arrived, "listed peers must each see every frame once");
    assert_eq!(rig.peers[1].data_count(), 0, "excluded peer must see nothing");

    // unicast streams sequence independently per destination host
    let mut seqs_b = rig.peers[0].data_seqs();
    let mut seqs_d = rig.peers[2].data_seqs();
    seqs_b.sort_unstable();
    seqs_d.sort_unstable();
    assert_eq!(seqs_b, vec![1, 2, 3]);
    assert_eq!(seqs_d, vec![1, 2, 3]);
}

#[test]
fn test_discard_filter_drops_everything() {
    let rig = rig_with_filter(FixedFilter::discard());

    for i in 0..3u8 {
        rig.app.send(&[i; 48]).expect("tap send");
    }
    std::thread::sleep(Duration::from_millis(500));

    assert_eq!(rig.peers[0].data_count(), 0);
    assert_eq!(rig.peers[1].data_count(), 0);
    assert_eq!(rig.peers[2].data_count(), 0);
    assert!(rig.handle.metrics().frames_filtered >= 3);
}

#[test]
fn test_rx_drops_unicast_not_addressed_to_us() {
    // local node is 1; inbound unicast frames target 7 only
    let rig = rig_with_filter(FixedFilter::unicast(&[7]));

    let engine_addr = rig.handle.link_status(2, 0).expect("status").local;
    rig.peers[0].send_data(1, b"not for node one", engine_addr);

    let frames = read_tap_frames(&rig.app, 1, Duration::from_millis(500));
    assert!(frames.is_empty(), "frame addressed elsewhere must not reach the tap");
    assert!(rig.handle.metrics().frames_filtered >= 1);
}

#[test]
fn test_rx_delivers_unicast_addressed_to_us() {
    let rig = rig_with_filter(FixedFilter::unicast(&[1]));

    let engine_addr = rig.handle.link_status(2, 0).expect("status").local;
    rig.peers[0].send_data(1, b"for node one", engine_addr);

    let frames = read_tap_frames(&rig.app, 1, Duration::from_secs(2));
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0], b"for node one");
}
