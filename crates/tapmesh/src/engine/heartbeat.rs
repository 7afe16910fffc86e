// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tapmesh.dev

//! Heartbeat worker: PING scheduling and pong-timeout detection.
//!
//! Runs on a coarse 200 ms grid. Each pass walks every configured link
//! under the read lock, emits a PING when the link's interval elapsed,
//! and flips the link down when PONG silence exceeded its timeout.

use crate::clock::MonotonicTs;
use crate::config::{CRYPTO_PAD, HEARTBEAT_RESOLUTION};
use crate::protocol::frame::PING_WIRE_SIZE;
use crate::engine::handle::Shared;
use crate::engine::metrics::EngineMetrics;
use crate::protocol::frame::{self, FRAME_PING};
use crate::registry::{Host, Link};
use std::sync::Arc;
use std::thread;

pub(crate) struct HeartbeatWorker {
    shared: Arc<Shared>,
    /// PING scratch; prefix pre-filled, link id and timestamp re-stamped
    /// per emission.
    ping_buf: [u8; PING_WIRE_SIZE],
    /// Ciphertext scratch for sealed PINGs.
    crypt_buf: Vec<u8>,
}

impl HeartbeatWorker {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            ping_buf: [0u8; PING_WIRE_SIZE],
            crypt_buf: vec![0u8; PING_WIRE_SIZE + CRYPTO_PAD],
        }
    }

    pub(crate) fn run(mut self) {
        log::debug!("[hb] started thread={:?}", thread::current().id());
        frame::encode_header(&mut self.ping_buf, FRAME_PING, self.shared.node_id);

        while self.shared.is_running() {
            thread::sleep(HEARTBEAT_RESOLUTION);

            let shared = Arc::clone(&self.shared);
            let registry = shared.registry.read();
            for host in registry.iter() {
                for link in host.links() {
                    if !link.is_configured() {
                        continue;
                    }
                    self.check_link(host, link);
                }
            }
        }
        log::debug!("[hb] stopped");
    }

    fn check_link(&mut self, host: &Host, link: &Link) {
        // cache pong_last before the clock read so the receiver cannot
        // move it between the comparison and the transition
        let pong_last_us = link.pong_last_us();
        let now = MonotonicTs::now();
        let now_us = now.as_micros();
        let timing = link.timing();

        if now_us.saturating_sub(link.ping_last_us()) >= timing.ping_interval_us {
            frame::set_link_id(&mut self.ping_buf, link.link_id());
            frame::set_timestamp(&mut self.ping_buf, now);

            let crypto = self.shared.crypto.read().clone();
            let (sealed, out_len) = match crypto.as_ref() {
                None => (false, PING_WIRE_SIZE),
                Some(crypto) => match crypto.seal(&self.ping_buf, &mut self.crypt_buf) {
                    Ok(sealed_len) => (true, sealed_len),
                    Err(_) => {
                        EngineMetrics::bump(&self.shared.metrics.crypto_failures);
                        return;
                    }
                },
            };
            let wire = if sealed {
                &self.crypt_buf[..out_len]
            } else {
                &self.ping_buf[..out_len]
            };
            match link.send(wire) {
                // ping_last only advances on a full send, so a failed
                // ping is retried on the next pass
                Ok(sent) if sent == out_len => {
                    link.set_ping_last_us(now_us);
                    EngineMetrics::bump(&self.shared.metrics.pings_sent);
                }
                Ok(sent) => {
                    log::debug!(
                        "[hb] short ping send {}/{} host={} link={}",
                        sent,
                        out_len,
                        host.node_id(),
                        link.link_id()
                    );
                }
                Err(err) => {
                    log::debug!(
                        "[hb] ping send failed host={} link={}: {}",
                        host.node_id(),
                        link.link_id(),
                        err
                    );
                }
            }
        }

        if link.is_connected() && now_us.saturating_sub(pong_last_us) >= timing.pong_timeout_us {
            link.set_connected(false);
            EngineMetrics::bump(&self.shared.metrics.links_down);
            log::debug!(
                "[hb] link down host={} link={} silent for {}us",
                host.node_id(),
                link.link_id(),
                now_us.saturating_sub(pong_last_us)
            );
            self.shared.notifier.post_lossy(host.node_id());
        }
    }
}
