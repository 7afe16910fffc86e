// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tapmesh.dev

//! Shared helpers for the end-to-end scenario tests.
//!
//! `FakePeer` is a scripted remote node: it answers PINGs (optionally
//! skewing the echoed timestamp to inflate the measured latency), records
//! every DATA frame it sees, and can inject DATA frames toward the engine.

#![allow(dead_code)] // each integration test binary uses a subset

use std::net::{SocketAddr, UdpSocket};
use std::os::unix::net::UnixDatagram;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tapmesh::clock::MonotonicTs;
use tapmesh::protocol::frame;
use tapmesh::{CryptoError, CryptoTransform};

/// Reserve `n` distinct loopback UDP addresses by binding and releasing.
pub fn reserve_ports(n: usize) -> Vec<SocketAddr> {
    let sockets: Vec<UdpSocket> = (0..n)
        .map(|_| UdpSocket::bind("127.0.0.1:0").expect("reserve bind"))
        .collect();
    sockets
        .iter()
        .map(|s| s.local_addr().expect("reserve addr"))
        .collect()
}

/// Poll `cond` until it holds or `deadline` elapses.
pub fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    cond()
}

/// Create a tap endpoint pair: (application side, engine side).
pub fn tap_pair() -> (UnixDatagram, UnixDatagram) {
    let (app, engine) = UnixDatagram::pair().expect("tap pair");
    app.set_read_timeout(Some(Duration::from_millis(100)))
        .expect("tap timeout");
    (app, engine)
}

/// Drain payloads from the application side of a tap until `expected`
/// frames arrived or the line stayed idle for `idle`.
pub fn read_tap_frames(app: &UnixDatagram, expected: usize, idle: Duration) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    let mut buf = vec![0u8; 65536];
    let mut last_frame = Instant::now();
    while frames.len() < expected && last_frame.elapsed() < idle {
        match app.recv(&mut buf) {
            Ok(n) => {
                frames.push(buf[..n].to_vec());
                last_frame = Instant::now();
            }
            Err(_) => {}
        }
    }
    frames
}

/// XOR-with-key transform shared by both ends of crypto scenarios.
/// One trailing tag byte makes sealed frames longer than plaintext.
pub struct XorTransform {
    key: u8,
}

impl XorTransform {
    pub fn new(key: u8) -> Self {
        Self { key }
    }
}

impl CryptoTransform for XorTransform {
    fn seal(&self, plain: &[u8], out: &mut [u8]) -> Result<usize, CryptoError> {
        if out.len() < plain.len() + 1 {
            return Err(CryptoError);
        }
        for (dst, src) in out.iter_mut().zip(plain.iter()) {
            *dst = src ^ self.key;
        }
        out[plain.len()] = self.key;
        Ok(plain.len() + 1)
    }

    fn open(&self, buf: &mut [u8]) -> Result<usize, CryptoError> {
        let len = buf.len();
        if len < 1 || buf[len - 1] != self.key {
            return Err(CryptoError);
        }
        for byte in &mut buf[..len - 1] {
            *byte ^= self.key;
        }
        Ok(len - 1)
    }
}

/// A scripted remote node behind one UDP socket.
pub struct FakePeer {
    node_id: u16,
    socket: Arc<UdpSocket>,
    addr: SocketAddr,
    running: Arc<AtomicBool>,
    answer_pings: Arc<AtomicBool>,
    /// Microseconds subtracted from echoed PING timestamps; inflates the
    /// latency the engine measures.
    ts_skew_us: Arc<AtomicU64>,
    data_frames: Arc<Mutex<Vec<(u16, Vec<u8>)>>>,
    thread: Option<JoinHandle<()>>,
}

impl FakePeer {
    /// Bind a loopback socket and start the answering thread.
    pub fn spawn(node_id: u16) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("peer bind");
        socket
            .set_read_timeout(Some(Duration::from_millis(50)))
            .expect("peer timeout");
        let addr = socket.local_addr().expect("peer addr");
        let socket = Arc::new(socket);

        let running = Arc::new(AtomicBool::new(true));
        let answer_pings = Arc::new(AtomicBool::new(true));
        let ts_skew_us = Arc::new(AtomicU64::new(0));
        let data_frames = Arc::new(Mutex::new(Vec::new()));

        let thread = {
            let socket = Arc::clone(&socket);
            let running = Arc::clone(&running);
            let answer_pings = Arc::clone(&answer_pings);
            let ts_skew_us = Arc::clone(&ts_skew_us);
            let data_frames = Arc::clone(&data_frames);
            thread::Builder::new()
                .name(format!("fake-peer-{node_id}"))
                .spawn(move || {
                    peer_loop(
                        node_id,
                        &socket,
                        &running,
                        &answer_pings,
                        &ts_skew_us,
                        &data_frames,
                    );
                })
                .expect("peer thread")
        };

        Self {
            node_id,
            socket,
            addr,
            running,
            answer_pings,
            ts_skew_us,
            data_frames,
            thread: Some(thread),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn set_answer_pings(&self, answer: bool) {
        self.answer_pings.store(answer, Ordering::Relaxed);
    }

    pub fn set_ts_skew_us(&self, skew: u64) {
        self.ts_skew_us.store(skew, Ordering::Relaxed);
    }

    pub fn data_count(&self) -> usize {
        self.data_frames.lock().unwrap().len()
    }

    pub fn data_seqs(&self) -> Vec<u16> {
        self.data_frames.lock().unwrap().iter().map(|(s, _)| *s).collect()
    }

    pub fn data_frames(&self) -> Vec<(u16, Vec<u8>)> {
        self.data_frames.lock().unwrap().clone()
    }

    /// Inject a DATA frame toward the engine's link socket.
    pub fn send_data(&self, seq: u16, payload: &[u8], to: SocketAddr) {
        let mut buf = vec![0u8; frame::DATA_HEADER_SIZE + payload.len()];
        frame::encode_header(&mut buf, frame::FRAME_DATA, self.node_id);
        frame::set_seq_num(&mut buf, seq);
        buf[frame::DATA_HEADER_SIZE..].copy_from_slice(payload);
        self.socket.send_to(&buf, to).expect("peer data send");
    }
}

impl Drop for FakePeer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn peer_loop(
    node_id: u16,
    socket: &UdpSocket,
    running: &AtomicBool,
    answer_pings: &AtomicBool,
    ts_skew_us: &AtomicU64,
    data_frames: &Mutex<Vec<(u16, Vec<u8>)>>,
) {
    let mut buf = vec![0u8; 65536];
    while running.load(Ordering::Relaxed) {
        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(got) => got,
            Err(_) => continue,
        };
        let Some((frame_type, _src_id)) = frame::decode_header(&buf[..len]) else {
            continue;
        };
        match frame_type {
            frame::FRAME_PING => {
                if !answer_pings.load(Ordering::Relaxed) {
                    continue;
                }
                frame::set_type(&mut buf, frame::FRAME_PONG);
                frame::set_src_id(&mut buf, node_id);
                let skew = ts_skew_us.load(Ordering::Relaxed);
                if skew > 0 {
                    let ts = frame::timestamp(&buf);
                    let micros = ts.as_micros().saturating_sub(skew);
                    frame::set_timestamp(
                        &mut buf,
                        MonotonicTs {
                            sec: micros / 1_000_000,
                            nsec: ((micros % 1_000_000) * 1000) as u32,
                        },
                    );
                }
                let _ = socket.send_to(&buf[..len], src);
            }
            frame::FRAME_DATA => {
                let seq = frame::seq_num(&buf);
                data_frames
                    .lock()
                    .unwrap()
                    .push((seq, buf[frame::DATA_HEADER_SIZE..len].to_vec()));
            }
            _ => {}
        }
    }
}
