// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tapmesh.dev

//! Engine counters for diagnostics.
//!
//! Every drop on the data plane is silent by design, so the counters are
//! the only way to see what the engine discarded and why.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters updated by the four workers (relaxed ordering; the
/// values are diagnostics, not synchronization).
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Frames read from the tap and accepted for forwarding.
    pub tap_frames_in: AtomicU64,
    /// Datagrams handed to link sockets (one per link per destination).
    pub frames_sent: AtomicU64,
    /// Payloads fully written to the tap.
    pub frames_delivered: AtomicU64,
    /// Datagrams dropped for bad length/magic/version/unknown host.
    pub frames_invalid: AtomicU64,
    /// DATA frames rejected by the duplicate suppressor.
    pub frames_duplicate: AtomicU64,
    /// Frames dropped by the destination filter (both directions).
    pub frames_filtered: AtomicU64,
    /// Seal/open failures.
    pub crypto_failures: AtomicU64,
    /// PING frames emitted by the heartbeat worker.
    pub pings_sent: AtomicU64,
    /// PONG frames processed by the receiver.
    pub pongs_received: AtomicU64,
    /// down -> up liveness transitions.
    pub links_up: AtomicU64,
    /// up -> down liveness transitions.
    pub links_down: AtomicU64,
}

/// Point-in-time copy of [`EngineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub tap_frames_in: u64,
    pub frames_sent: u64,
    pub frames_delivered: u64,
    pub frames_invalid: u64,
    pub frames_duplicate: u64,
    pub frames_filtered: u64,
    pub crypto_failures: u64,
    pub pings_sent: u64,
    pub pongs_received: u64,
    pub links_up: u64,
    pub links_down: u64,
}

impl EngineMetrics {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy out all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tap_frames_in: self.tap_frames_in.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            frames_invalid: self.frames_invalid.load(Ordering::Relaxed),
            frames_duplicate: self.frames_duplicate.load(Ordering::Relaxed),
            frames_filtered: self.frames_filtered.load(Ordering::Relaxed),
            crypto_failures: self.crypto_failures.load(Ordering::Relaxed),
            pings_sent: self.pings_sent.load(Ordering::Relaxed),
            pongs_received: self.pongs_received.load(Ordering::Relaxed),
            links_up: self.links_up.load(Ordering::Relaxed),
            links_down: self.links_down.load(Ordering::Relaxed),
        }
    }
}
