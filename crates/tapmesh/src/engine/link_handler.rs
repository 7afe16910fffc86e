// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tapmesh.dev

//! Link-handler worker: the sole consumer of liveness notifications.
//!
//! Serializes every active-vector rewrite behind the registry write lock.
//! Producers only flip per-link atomics; this worker re-reads
//! `configured && connected` under the write lock to produce the
//! authoritative vector, so a racing flip merely queues a redundant
//! recompute.

use crate::config::POLL_TIMEOUT;
use crate::engine::handle::Shared;
use crossbeam::channel::{Receiver, RecvTimeoutError};
use std::sync::Arc;

pub(crate) struct LinkHandlerWorker {
    shared: Arc<Shared>,
    notify_rx: Receiver<u16>,
}

impl LinkHandlerWorker {
    pub(crate) fn new(shared: Arc<Shared>, notify_rx: Receiver<u16>) -> Self {
        Self { shared, notify_rx }
    }

    pub(crate) fn run(self) {
        log::debug!("[linkhdl] started thread={:?}", std::thread::current().id());
        while self.shared.is_running() {
            match self.notify_rx.recv_timeout(POLL_TIMEOUT) {
                Ok(node_id) => self.recompute(node_id),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        log::debug!("[linkhdl] stopped");
    }

    fn recompute(&self, node_id: u16) {
        let registry = self.shared.registry.write();
        // the host may have been removed while the event sat in the queue
        let Some(host) = registry.host(node_id) else {
            return;
        };
        host.recompute_active();
        let active = host.active().lock();
        log::debug!(
            "[linkhdl] active vector rebuilt host={} entries={} order={:?}",
            node_id,
            active.entries,
            active.as_slice()
        );
    }
}
