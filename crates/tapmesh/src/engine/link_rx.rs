// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tapmesh.dev

//! Links-to-tap receiver worker.
//!
//! Every configured link socket is registered on this worker's poller;
//! events dispatch by raw fd through the registry's fd index. A datagram
//! is processed end to end under the registry read lock:
//!
//! ```text
//! recv -> open? -> magic/version -> source host -> DATA | PING | PONG
//!   DATA: filter? -> dedup check -> tap write -> dedup mark
//!   PING: rewrite to PONG in place -> seal? -> reply on same link
//!   PONG: latency EWMA -> down->up transition -> notify link-handler
//! ```

use crate::clock::MonotonicTs;
use crate::config::{CRYPTO_PAD, CRYPT_BUF_SIZE, MAX_EVENTS, MAX_LINK, POLL_TIMEOUT};
use crate::engine::fd;
use crate::engine::handle::Shared;
use crate::engine::metrics::EngineMetrics;
use crate::filter::Route;
use crate::protocol::frame::{
    self, DATA_HEADER_SIZE, FRAME_DATA, FRAME_LINK_BIT, FRAME_PING, FRAME_PONG, PING_WIRE_SIZE,
};
use crate::registry::{Host, HostRegistry, Link};
use mio::{Events, Poll};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;

pub(crate) struct LinkRxWorker {
    shared: Arc<Shared>,
    poll: Poll,
    /// Receive scratch; sized for worst-case sealed frames.
    buf: Vec<u8>,
    /// Ciphertext scratch for re-sealing PONG replies.
    pong_crypt: Vec<u8>,
    /// Reused target list for the receive-side filter check.
    targets: Vec<u16>,
}

impl LinkRxWorker {
    pub(crate) fn new(shared: Arc<Shared>, poll: Poll) -> Self {
        Self {
            shared,
            poll,
            buf: vec![0u8; CRYPT_BUF_SIZE],
            pong_crypt: vec![0u8; PING_WIRE_SIZE + CRYPTO_PAD],
            targets: Vec::with_capacity(32),
        }
    }

    pub(crate) fn run(mut self) {
        log::debug!("[rx] started thread={:?}", std::thread::current().id());
        let mut events = Events::with_capacity(MAX_EVENTS);
        while self.shared.is_running() {
            if let Err(err) = self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                if err.kind() != io::ErrorKind::Interrupted {
                    log::debug!("[rx] poll error: {}", err);
                }
                continue;
            }
            for event in events.iter() {
                self.drain_socket(event.token().0 as RawFd);
            }
        }
        log::debug!("[rx] stopped");
    }

    /// Edge-triggered: receive until the socket runs dry. The read lock
    /// is held across the drain so link and host references stay valid
    /// for the whole datagram.
    fn drain_socket(&mut self, fd: RawFd) {
        let shared = Arc::clone(&self.shared);
        let registry = shared.registry.read();
        loop {
            // re-resolved every iteration: the event may be stale if the
            // link was removed between poll and lock
            let Some((host_id, link_id)) = registry.fd_lookup(fd) else {
                return;
            };
            let Some(link) = registry.host(host_id).and_then(|h| h.link(link_id)) else {
                return;
            };
            let len = match link.recv(&mut self.buf) {
                Ok(len) => len,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) => {
                    log::debug!("[rx] recv error fd={}: {}", fd, err);
                    return;
                }
            };
            self.process(&registry, len);
        }
    }

    fn process(&mut self, registry: &HostRegistry, wire_len: usize) {
        let mut len = wire_len;
        {
            let crypto = self.shared.crypto.read().clone();
            if let Some(crypto) = crypto.as_ref() {
                match crypto.open(&mut self.buf[..len]) {
                    Ok(plain_len) => len = plain_len,
                    Err(_) => {
                        EngineMetrics::bump(&self.shared.metrics.crypto_failures);
                        return;
                    }
                }
            }
        }

        let Some((frame_type, src_id)) = frame::decode_header(&self.buf[..len]) else {
            EngineMetrics::bump(&self.shared.metrics.frames_invalid);
            return;
        };
        let Some(host) = registry.host(src_id) else {
            // unknown senders are dropped silently
            log::debug!("[rx] frame from unknown host id={}", src_id);
            EngineMetrics::bump(&self.shared.metrics.frames_invalid);
            return;
        };

        let link = if frame_type & FRAME_LINK_BIT != 0 {
            if len < PING_WIRE_SIZE {
                EngineMetrics::bump(&self.shared.metrics.frames_invalid);
                return;
            }
            match host.link(frame::link_id(&self.buf) % MAX_LINK as u8) {
                Some(link) => Some(link),
                None => {
                    EngineMetrics::bump(&self.shared.metrics.frames_invalid);
                    return;
                }
            }
        } else {
            None
        };

        match frame_type {
            FRAME_DATA => self.handle_data(host, len),
            FRAME_PING => {
                if let Some(link) = link {
                    self.handle_ping(link, len);
                }
            }
            FRAME_PONG => {
                if let Some(link) = link {
                    self.handle_pong(host, link);
                }
            }
            other => {
                log::debug!("[rx] unknown frame type {:#04x} from host={}", other, src_id);
            }
        }
    }

    fn handle_data(&mut self, host: &Host, len: usize) {
        if !self.shared.is_enabled() {
            return;
        }
        if len < DATA_HEADER_SIZE {
            EngineMetrics::bump(&self.shared.metrics.frames_invalid);
            return;
        }
        let seq = frame::seq_num(&self.buf);
        let payload_len = len - DATA_HEADER_SIZE;

        let mut bcast = true;
        if let Some(filter) = &self.shared.filter {
            self.targets.clear();
            match filter.route(
                &self.buf[DATA_HEADER_SIZE..len],
                host.node_id(),
                &mut self.targets,
            ) {
                Route::Discard => {
                    EngineMetrics::bump(&self.shared.metrics.frames_filtered);
                    return;
                }
                Route::Broadcast => {}
                Route::Unicast => {
                    bcast = false;
                    if !self.targets.contains(&self.shared.node_id) {
                        // not addressed to this node
                        EngineMetrics::bump(&self.shared.metrics.frames_filtered);
                        return;
                    }
                }
            }
        }

        let mut rx = host.rx().lock();
        let window = rx.window(bcast);
        if !window.should_deliver(seq) {
            EngineMetrics::bump(&self.shared.metrics.frames_duplicate);
            return;
        }
        match fd::write(self.shared.tap_fd, &self.buf[DATA_HEADER_SIZE..len]) {
            Ok(written) if written == payload_len => {
                // only a complete write counts as delivered; a short one
                // stays redeliverable by another link
                window.mark_delivered(seq);
                EngineMetrics::bump(&self.shared.metrics.frames_delivered);
            }
            Ok(written) => {
                log::debug!(
                    "[rx] short tap write {}/{} seq={} host={}",
                    written,
                    payload_len,
                    seq,
                    host.node_id()
                );
            }
            Err(err) => {
                log::debug!("[rx] tap write failed seq={}: {}", seq, err);
            }
        }
    }

    fn handle_ping(&mut self, link: &Link, len: usize) {
        frame::set_type(&mut self.buf, FRAME_PONG);
        frame::set_src_id(&mut self.buf, self.shared.node_id);

        let crypto = self.shared.crypto.read().clone();
        let (sealed, out_len) = match crypto.as_ref() {
            None => (false, len),
            Some(crypto) => match crypto.seal(&self.buf[..len], &mut self.pong_crypt) {
                Ok(sealed_len) => (true, sealed_len),
                Err(_) => {
                    EngineMetrics::bump(&self.shared.metrics.crypto_failures);
                    return;
                }
            },
        };
        let wire = if sealed {
            &self.pong_crypt[..out_len]
        } else {
            &self.buf[..out_len]
        };
        if let Err(err) = link.send(wire) {
            log::debug!("[rx] pong reply failed link={}: {}", link.link_id(), err);
        }
    }

    fn handle_pong(&mut self, host: &Host, link: &Link) {
        EngineMetrics::bump(&self.shared.metrics.pongs_received);

        let now = MonotonicTs::now();
        link.set_pong_last_us(now.as_micros());

        let sample_us = now.micros_since(frame::timestamp(&self.buf));
        let timing = link.timing();
        let latency_us = timing.ewma(link.latency_us(), sample_us);
        link.set_latency_us(latency_us);

        if latency_us < timing.pong_timeout_us && !link.is_connected() {
            link.set_connected(true);
            EngineMetrics::bump(&self.shared.metrics.links_up);
            log::debug!(
                "[rx] link up host={} link={} latency={}us",
                host.node_id(),
                link.link_id(),
                latency_us
            );
            self.shared.notifier.post_lossy(host.node_id());
        }
    }
}
