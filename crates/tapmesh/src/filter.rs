// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tapmesh.dev

//! Destination filter: the embedder's per-frame routing decision.
//!
//! When installed, the filter sees every outbound payload (to pick the
//! targets) and every inbound unicast payload (to confirm the local node
//! is among the targets). Without a filter, every frame is broadcast.

/// Routing verdict returned by [`DstFilter::route`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Drop the frame.
    Discard,
    /// Send to every registered host; `targets` is ignored.
    Broadcast,
    /// Send to the node ids the filter pushed into `targets`.
    /// An empty target list drops the frame.
    Unicast,
}

/// Per-frame destination decision.
///
/// Implementations are invoked from the forwarder and receiver worker
/// threads and must be `Send + Sync`. The payload slice is exactly the
/// application frame: no tapmesh header or sequence bytes.
pub trait DstFilter: Send + Sync {
    /// Decide the route for `payload` originated by `src_id`.
    ///
    /// `targets` arrives empty with its capacity preserved across calls;
    /// push node ids into it for [`Route::Unicast`] verdicts.
    fn route(&self, payload: &[u8], src_id: u16, targets: &mut Vec<u16>) -> Route;
}
