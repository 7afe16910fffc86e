// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tapmesh.dev

//! Tapmesh global configuration - single source of truth.
//!
//! This module centralizes the engine's compile-time constants and the
//! handle creation config. **Never hardcode these elsewhere!**

use crate::filter::DstFilter;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

// =======================================================================
// Topology limits
// =======================================================================

/// Number of addressable peer hosts (the full 16-bit node id space).
///
/// The host arena is indexed directly by node id, so lookup is O(1).
pub const MAX_HOST: usize = u16::MAX as usize + 1;

/// Maximum number of UDP links per host.
pub const MAX_LINK: usize = 8;

// =======================================================================
// Buffers
// =======================================================================

/// Largest on-wire frame (header + sequence + payload) the engine handles.
pub const MAX_PACKET_SIZE: usize = 65536;

/// Extra room granted to a [`CryptoTransform`](crate::CryptoTransform) for
/// sealing overhead (tag, padding, nonce). Sealed output must fit within
/// `plaintext_len + CRYPTO_PAD`.
pub const CRYPTO_PAD: usize = 1024;

/// Size of the ciphertext scratch buffers.
pub const CRYPT_BUF_SIZE: usize = MAX_PACKET_SIZE + CRYPTO_PAD;

// =======================================================================
// Sequencing
// =======================================================================

/// Width of a duplicate-suppression window, in sequence numbers.
///
/// Sequences farther than this from the window head (on either side) are
/// rejected as out-of-window.
pub const SEQ_WINDOW_SIZE: u16 = 4096;

// =======================================================================
// Timers
// =======================================================================

/// Coarse resolution of the heartbeat worker's outer loop.
///
/// Ping scheduling and pong-timeout detection are quantized to this grid.
pub const HEARTBEAT_RESOLUTION: Duration = Duration::from_millis(200);

/// Poll timeout for the worker loops; bounds shutdown latency.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// Default ping interval applied to a freshly configured link.
pub const DEFAULT_PING_INTERVAL_MS: u64 = 1000;

/// Default pong timeout applied to a freshly configured link.
pub const DEFAULT_PONG_TIMEOUT_MS: u64 = 2000;

/// Default latency EWMA precision applied to a freshly configured link.
pub const DEFAULT_PRECISION: u64 = 2048;

// =======================================================================
// Notification channel
// =======================================================================

/// Capacity of the liveness notification channel (producer: receiver and
/// heartbeat workers, consumer: link-handler worker).
pub const NOTIFY_CHANNEL_CAPACITY: usize = 256;

/// Bounded retry count for posting on a full notification channel.
pub const NOTIFY_RETRY_LIMIT: usize = 10;

/// Event capacity of the per-worker pollers.
pub const MAX_EVENTS: usize = 8;

// =======================================================================
// Handle config
// =======================================================================

/// Configuration for [`Handle::new`](crate::Handle::new).
///
/// The tap file descriptor is *borrowed*: the engine reads outbound frames
/// from it and writes delivered payloads to it, but never closes it. It
/// must carry datagram semantics (one read = one frame).
pub struct HandleConfig {
    /// Local node id; stamped as the source id of every emitted frame.
    pub node_id: u16,
    /// Tap-style file descriptor delivering framed payloads. Must be > 0.
    pub tap_fd: RawFd,
    /// Optional destination filter deciding per-frame routing.
    pub dst_filter: Option<Arc<dyn DstFilter>>,
}

impl HandleConfig {
    /// Convenience constructor without a destination filter.
    #[must_use]
    pub fn new(node_id: u16, tap_fd: RawFd) -> Self {
        Self {
            node_id,
            tap_fd,
            dst_filter: None,
        }
    }
}
