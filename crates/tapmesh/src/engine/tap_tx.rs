// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tapmesh.dev

//! Tap-to-links forwarder worker.
//!
//! Reads application frames from the tap fd, stamps them with a stream
//! sequence number, optionally seals them, and transmits on the link(s)
//! selected by each destination host's policy.
//!
//! ```text
//! tap fd -> read payload -> filter? -> seq stamp -> seal? -> active links
//! ```

use crate::config::{MAX_EVENTS, MAX_PACKET_SIZE, POLL_TIMEOUT};
use crate::engine::handle::Shared;
use crate::engine::metrics::EngineMetrics;
use crate::engine::fd;
use crate::filter::Route;
use crate::protocol::frame::{self, DATA_HEADER_SIZE, FRAME_DATA};
use crate::registry::{Host, LinkPolicy};
use mio::{Events, Poll};
use std::io;
use std::sync::Arc;

pub(crate) struct TapTxWorker {
    shared: Arc<Shared>,
    poll: Poll,
    /// Plaintext scratch: header prefix + payload region.
    buf: Vec<u8>,
    /// Ciphertext scratch for sealed output.
    crypt_buf: Vec<u8>,
    /// Reused unicast target list handed to the destination filter.
    targets: Vec<u16>,
}

impl TapTxWorker {
    pub(crate) fn new(shared: Arc<Shared>, poll: Poll) -> Self {
        Self {
            shared,
            poll,
            buf: vec![0u8; MAX_PACKET_SIZE],
            crypt_buf: vec![0u8; crate::config::CRYPT_BUF_SIZE],
            targets: Vec::with_capacity(32),
        }
    }

    pub(crate) fn run(mut self) {
        log::debug!("[taptx] started thread={:?}", std::thread::current().id());
        // the fixed prefix never changes for this worker
        frame::encode_header(&mut self.buf, FRAME_DATA, self.shared.node_id);

        let mut events = Events::with_capacity(MAX_EVENTS);
        while self.shared.is_running() {
            if let Err(err) = self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                if err.kind() != io::ErrorKind::Interrupted {
                    log::debug!("[taptx] poll error: {}", err);
                }
                continue;
            }
            if !events.is_empty() {
                self.drain_tap();
            }
        }
        log::debug!("[taptx] stopped");
    }

    /// The poller is edge-triggered: read until the tap runs dry.
    fn drain_tap(&mut self) {
        loop {
            let n = match fd::read(self.shared.tap_fd, &mut self.buf[DATA_HEADER_SIZE..]) {
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) => {
                    log::debug!("[taptx] tap read error: {}", err);
                    return;
                }
            };
            if n == 0 {
                // upstream endpoint disconnected; nothing to forward
                log::debug!("[taptx] zero-length tap read, discarding wakeup");
                return;
            }
            self.forward(n);
        }
    }

    fn forward(&mut self, payload_len: usize) {
        if !self.shared.is_enabled() {
            return;
        }
        EngineMetrics::bump(&self.shared.metrics.tap_frames_in);

        self.targets.clear();
        let route = match &self.shared.filter {
            Some(filter) => filter.route(
                &self.buf[DATA_HEADER_SIZE..DATA_HEADER_SIZE + payload_len],
                self.shared.node_id,
                &mut self.targets,
            ),
            None => Route::Broadcast,
        };
        match route {
            Route::Discard => {
                EngineMetrics::bump(&self.shared.metrics.frames_filtered);
                return;
            }
            Route::Unicast if self.targets.is_empty() => {
                EngineMetrics::bump(&self.shared.metrics.frames_filtered);
                return;
            }
            _ => {}
        }

        let wire_len = DATA_HEADER_SIZE + payload_len;
        let shared = Arc::clone(&self.shared);
        let registry = shared.registry.read();

        if route == Route::Unicast {
            for i in 0..self.targets.len() {
                let Some(host) = registry.host(self.targets[i]) else {
                    continue;
                };
                frame::set_seq_num(&mut self.buf, host.next_ucast_seq());
                let Some((sealed, out_len)) = self.seal_if_needed(wire_len) else {
                    return;
                };
                let wire = if sealed {
                    &self.crypt_buf[..out_len]
                } else {
                    &self.buf[..out_len]
                };
                send_on_active(host, wire, &shared.metrics);
            }
        } else {
            frame::set_seq_num(&mut self.buf, self.shared.next_bcast_seq());
            let Some((sealed, out_len)) = self.seal_if_needed(wire_len) else {
                return;
            };
            let wire = if sealed {
                &self.crypt_buf[..out_len]
            } else {
                &self.buf[..out_len]
            };
            for host in registry.iter() {
                send_on_active(host, wire, &shared.metrics);
            }
        }
    }

    /// Seal the stamped frame when a transform is installed.
    ///
    /// Returns `(used_crypt_buf, wire_len)`, or `None` on a seal failure
    /// (the whole forward operation is abandoned).
    fn seal_if_needed(&mut self, wire_len: usize) -> Option<(bool, usize)> {
        let crypto = self.shared.crypto.read().clone();
        match crypto.as_ref() {
            None => Some((false, wire_len)),
            Some(crypto) => match crypto.seal(&self.buf[..wire_len], &mut self.crypt_buf) {
                Ok(sealed_len) => Some((true, sealed_len)),
                Err(_) => {
                    EngineMetrics::bump(&self.shared.metrics.crypto_failures);
                    None
                }
            },
        }
    }
}

/// Walk the host's active link vector per its policy.
///
/// `Passive` and `Active` transmit on every entry; `RoundRobin` transmits
/// on the head entry only and rotates it to the tail. Send errors are
/// per-datagram and never stop the walk.
pub(crate) fn send_on_active(host: &Host, wire: &[u8], metrics: &EngineMetrics) {
    let mut active = host.active().lock();
    for slot in 0..usize::from(active.entries) {
        let link_idx = active.order[slot];
        if let Some(link) = host.link(link_idx) {
            match link.send(wire) {
                Ok(_) => EngineMetrics::bump(&metrics.frames_sent),
                Err(err) => log::debug!(
                    "[taptx] send failed host={} link={}: {}",
                    host.node_id(),
                    link_idx,
                    err
                ),
            }
        }
        if host.policy() == LinkPolicy::RoundRobin && active.entries > 1 {
            active.rotate();
            break;
        }
    }
}
