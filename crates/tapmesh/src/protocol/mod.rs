// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tapmesh.dev

//! On-wire protocol between tapmesh peers.
//!
//! A single fixed-prefix frame format covers the data plane (DATA) and the
//! liveness plane (PING/PONG). Peers that observe a foreign magic or
//! version silently drop the datagram.

/// Fixed-header frame codec.
pub mod frame;

pub use frame::{
    FRAME_DATA, FRAME_LINK_BIT, FRAME_MAGIC, FRAME_PING, FRAME_PONG, FRAME_VERSION,
    DATA_HEADER_SIZE, HEADER_SIZE, PING_WIRE_SIZE, SEQ_SIZE, TIMESTAMP_SIZE,
};
