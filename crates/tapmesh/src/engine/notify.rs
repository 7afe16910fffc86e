// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tapmesh.dev

//! Liveness notification channel.
//!
//! Producers (receiver, heartbeat, operator link-disable) post the node id
//! of a host whose link liveness changed; the link-handler worker is the
//! sole consumer and rebuilds that host's active link vector. The channel
//! is bounded: a full channel only means recomputes are already queued, so
//! producers retry a bounded number of times and then give up.

use crate::config::NOTIFY_RETRY_LIMIT;
use crate::error::{Error, Result};
use crossbeam::channel::{Sender, TrySendError};

/// Posting side of the notification channel.
#[derive(Clone)]
pub(crate) struct Notifier {
    tx: Sender<u16>,
}

impl Notifier {
    pub(crate) fn new(tx: Sender<u16>) -> Self {
        Self { tx }
    }

    /// Post a host id, retrying up to [`NOTIFY_RETRY_LIMIT`] times while
    /// the channel is full.
    ///
    /// Operator paths surface the error; data-plane callers log and drop
    /// via [`Notifier::post_lossy`].
    pub(crate) fn post(&self, node_id: u16) -> Result<()> {
        let mut value = node_id;
        for _ in 0..=NOTIFY_RETRY_LIMIT {
            match self.tx.try_send(value) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(v)) => {
                    value = v;
                    std::thread::yield_now();
                }
                Err(TrySendError::Disconnected(_)) => {
                    return Err(Error::InvalidState("link-handler is gone"))
                }
            }
        }
        Err(Error::NotifyChannelFull)
    }

    /// Data-plane variant: failure is logged at debug and swallowed. The
    /// pending recomputes already in the channel will re-read the link
    /// state this notification was about.
    pub(crate) fn post_lossy(&self, node_id: u16) {
        if let Err(err) = self.post(node_id) {
            log::debug!("[notify] dropped liveness event host={}: {}", node_id, err);
        }
    }
}
