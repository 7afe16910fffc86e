// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tapmesh.dev

//! The runtime engine: four cooperating worker threads around one shared
//! registry.
//!
//! # Architecture
//!
//! ```text
//! tap fd --POLLIN--> [taptx]  --UDP--> per-host active links
//! link sockets --POLLIN--> [rx] --+--> tap fd (DATA, after dedup)
//!                                 +--> same link (PONG reply)
//!                                 +--> notify channel (down->up)
//! [hb] --200ms grid--> PING on every configured link
//!                      +--> notify channel (up->down)
//! notify channel --> [linkhdl] --write lock--> active vector rebuild
//! ```
//!
//! The forwarder, receiver, and heartbeat workers are readers of the
//! registry lock; the link-handler is its only liveness-driven writer.
//! Producers never touch active vectors directly: they flip per-link
//! atomics and post the host id on the notification channel.

/// Raw fd helpers for the tap endpoint.
mod fd;
/// Handle lifecycle and operator API.
mod handle;
/// Heartbeat worker (PING scheduling, pong-timeout detection).
mod heartbeat;
/// Link-handler worker (active vector recomputation).
mod link_handler;
/// Links-to-tap receiver worker.
mod link_rx;
/// Engine counters.
mod metrics;
/// Liveness notification channel.
mod notify;
/// Tap-to-links forwarder worker.
mod tap_tx;

pub use handle::Handle;
pub use metrics::{EngineMetrics, MetricsSnapshot};
