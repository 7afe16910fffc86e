// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tapmesh.dev

//! # tapmesh - user-space multi-link virtual network engine
//!
//! Tapmesh carries opaque application frames (typically layer-2 frames
//! from a tap-style endpoint) across sets of UDP paths to peer nodes. The
//! embedder hands in and receives frames through a single local file
//! descriptor; the engine fans them out across per-peer links according
//! to a policy, probes every link with PING/PONG liveness, and suppresses
//! the duplicates that multi-path transmission creates.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use tapmesh::{Handle, HandleConfig, LinkPolicy, Result};
//! # use std::os::unix::io::AsRawFd;
//!
//! fn main() -> Result<()> {
//!     # let tap = std::os::unix::net::UnixDatagram::unbound().unwrap();
//!     let handle = Handle::new(HandleConfig::new(1, tap.as_raw_fd()))?;
//!
//!     handle.add_host(2, "peer-two")?;
//!     handle.set_policy(2, LinkPolicy::RoundRobin)?;
//!     handle.configure_link(
//!         2,
//!         0,
//!         "0.0.0.0:5405".parse().unwrap(),
//!         "192.0.2.10:5405".parse().unwrap(),
//!     )?;
//!     handle.set_link_enabled(2, 0, true)?;
//!
//!     handle.set_forwarding(true);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                       Embedder                               |
//! |        tap fd  |  DstFilter  |  CryptoTransform              |
//! +--------------------------------------------------------------+
//! |                        Engine                                |
//! |  taptx -> seq stamp -> seal -> policy walk over active links |
//! |  rx    -> open -> validate -> dedup -> tap (DATA)            |
//! |        -> PONG reply (PING) / latency EWMA + up (PONG)       |
//! |  hb    -> PING cadence, pong-timeout -> down                 |
//! |  linkhdl -> active vector rebuild per liveness notification  |
//! +--------------------------------------------------------------+
//! |               Host/link registry (RwLock)                    |
//! |  host arena by node id | links | dedup windows | policies    |
//! +--------------------------------------------------------------+
//! ```
//!
//! ## Key types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Handle`] | The engine instance; factory for all operations |
//! | [`HandleConfig`] | Node id, tap fd, optional destination filter |
//! | [`LinkPolicy`] | Passive / RoundRobin / Active link selection |
//! | [`LinkStatus`] | Point-in-time link view (liveness, latency) |
//! | [`CryptoTransform`] | Pluggable seal/open for whole wire frames |
//! | [`DstFilter`] | Per-frame routing decision by the embedder |
//!
//! ## Delivery semantics
//!
//! Frames are delivered at most once per stream sequence number,
//! unordered across links. There is no retransmission, flow control, or
//! fragmentation: tapmesh is a data plane, not a reliable transport.

/// Monotonic timestamps for liveness sampling.
pub mod clock;
/// Compile-time constants and handle configuration.
pub mod config;
/// Pluggable symmetric frame transform.
pub mod crypto;
/// The four-worker runtime engine.
pub mod engine;
/// Operator-facing error types.
pub mod error;
/// Destination filter trait.
pub mod filter;
/// Link liveness timing and latency EWMA.
pub mod liveness;
/// On-wire frame codec.
pub mod protocol;
/// Host/link registry and duplicate suppression.
pub mod registry;

pub use clock::MonotonicTs;
pub use config::HandleConfig;
pub use crypto::{CryptoError, CryptoTransform};
pub use engine::{EngineMetrics, Handle, MetricsSnapshot};
pub use error::{Error, Result};
pub use filter::{DstFilter, Route};
pub use liveness::LinkTiming;
pub use registry::{LinkPolicy, LinkStatus};

/// Tapmesh version string.
pub const VERSION: &str = "0.4.2";
