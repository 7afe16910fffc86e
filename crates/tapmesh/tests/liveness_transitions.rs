// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tapmesh.dev

//! Liveness state machine scenarios: latency-gated rise, timeout-driven
//! fall, and the exactly-once nature of both transitions.

mod common;

use common::{read_tap_frames, tap_pair, wait_until, FakePeer};
use std::os::unix::io::AsRawFd;
use std::thread;
use std::time::Duration;
use tapmesh::{Handle, HandleConfig};

const PEER_ID: u16 = 9;

#[test]
fn test_pong_latency_above_timeout_keeps_link_down() {
    let (app, engine) = tap_pair();
    let handle = Handle::new(HandleConfig::new(1, engine.as_raw_fd())).expect("handle");
    handle.add_host(PEER_ID, "nine").expect("add host");

    let peer = FakePeer::spawn(PEER_ID);
    // precision 8 with a 1 s ping interval gives the newest sample 1/8
    // weight; a 16 s timestamp skew pushes the EWMA to ~2 s, above the
    // 1.9 s pong timeout
    peer.set_ts_skew_us(16_000_000);
    handle
        .configure_link(PEER_ID, 0, "127.0.0.1:0".parse().unwrap(), peer.addr())
        .expect("configure");
    handle
        .set_link_timeouts(PEER_ID, 0, 1000, 1900, 8)
        .expect("timeouts");
    handle.set_link_enabled(PEER_ID, 0, true).expect("enable");
    handle.set_forwarding(true);

    // a pong arrives but the measured latency disqualifies it
    let ponged = wait_until(Duration::from_secs(3), || handle.metrics().pongs_received > 0);
    assert!(ponged, "peer must have answered at least one ping");
    assert!(!handle.link_status(PEER_ID, 0).expect("status").connected);
    assert_eq!(handle.metrics().links_up, 0);

    // frames have no active link to ride
    app.send(&[1u8; 64]).expect("tap send");
    thread::sleep(Duration::from_millis(300));
    assert_eq!(peer.data_count(), 0);

    // honest pongs pull the EWMA back under the timeout: exactly one
    // down -> up transition
    peer.set_ts_skew_us(0);
    let up = wait_until(Duration::from_secs(6), || {
        handle.link_status(PEER_ID, 0).map(|s| s.connected).unwrap_or(false)
    });
    assert!(up, "clean pongs must bring the link up");
    assert_eq!(handle.metrics().links_up, 1);

    // and traffic flows now
    app.send(&[2u8; 64]).expect("tap send");
    let arrived = wait_until(Duration::from_secs(2), || peer.data_count() == 1);
    assert!(arrived, "frame must ride the newly risen link");
}

#[test]
fn test_pong_silence_drives_exactly_one_down_transition() {
    let (_app, engine) = tap_pair();
    let handle = Handle::new(HandleConfig::new(1, engine.as_raw_fd())).expect("handle");
    handle.add_host(PEER_ID, "nine").expect("add host");

    let peer = FakePeer::spawn(PEER_ID);
    handle
        .configure_link(PEER_ID, 0, "127.0.0.1:0".parse().unwrap(), peer.addr())
        .expect("configure");
    handle
        .set_link_timeouts(PEER_ID, 0, 200, 1200, 2048)
        .expect("timeouts");
    handle.set_link_enabled(PEER_ID, 0, true).expect("enable");

    let up = wait_until(Duration::from_secs(5), || {
        handle.link_status(PEER_ID, 0).map(|s| s.connected).unwrap_or(false)
    });
    assert!(up, "link must come up first");
    assert_eq!(handle.metrics().links_up, 1);

    peer.set_answer_pings(false);
    let down = wait_until(Duration::from_secs(5), || {
        !handle.link_status(PEER_ID, 0).map(|s| s.connected).unwrap_or(true)
    });
    assert!(down, "pong silence must take the link down");
    assert_eq!(handle.metrics().links_down, 1);

    // silence keeps it down without further transitions
    thread::sleep(Duration::from_secs(1));
    assert_eq!(handle.metrics().links_down, 1);
    assert_eq!(handle.metrics().links_up, 1);
}

#[test]
fn test_reconnect_after_outage_restarts_clean() {
    let (app, engine) = tap_pair();
    let handle = Handle::new(HandleConfig::new(1, engine.as_raw_fd())).expect("handle");
    handle.add_host(PEER_ID, "nine").expect("add host");

    let peer = FakePeer::spawn(PEER_ID);
    handle
        .configure_link(PEER_ID, 0, "127.0.0.1:0".parse().unwrap(), peer.addr())
        .expect("configure");
    handle
        .set_link_timeouts(PEER_ID, 0, 200, 1200, 2048)
        .expect("timeouts");
    handle.set_link_enabled(PEER_ID, 0, true).expect("enable");
    handle.set_forwarding(true);

    assert!(wait_until(Duration::from_secs(5), || {
        handle.link_status(PEER_ID, 0).map(|s| s.connected).unwrap_or(false)
    }));

    // deliver one inbound frame so the dedup window holds state
    let engine_addr = handle.link_status(PEER_ID, 0).expect("status").local;
    peer.send_data(5, b"before outage", engine_addr);
    let first = read_tap_frames(&app, 1, Duration::from_secs(2));
    assert_eq!(first.len(), 1);

    // outage: link down empties the active set and resets the windows
    peer.set_answer_pings(false);
    assert!(wait_until(Duration::from_secs(5), || {
        !handle.link_status(PEER_ID, 0).map(|s| s.connected).unwrap_or(true)
    }));
    peer.set_answer_pings(true);
    assert!(wait_until(Duration::from_secs(5), || {
        handle.link_status(PEER_ID, 0).map(|s| s.connected).unwrap_or(false)
    }));
    thread::sleep(Duration::from_millis(300));

    // the same sequence number is deliverable again after the reset
    peer.send_data(5, b"after outage", engine_addr);
    let second = read_tap_frames(&app, 1, Duration::from_secs(2));
    assert_eq!(second.len(), 1);
    assert_eq!(second[0], b"after outage");
}
