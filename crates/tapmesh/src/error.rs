// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tapmesh.dev

//! Error types for the tapmesh public API.
//!
//! Data-plane failures (malformed frames, crypto rejects, per-datagram
//! send errors) are never surfaced here; they are dropped silently and
//! counted in [`EngineMetrics`](crate::engine::EngineMetrics). This enum
//! covers the operator-facing paths only.

use std::fmt;
use std::io;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Operator-facing errors.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Configuration errors
    // ========================================================================
    /// Invalid argument at handle creation or link operation.
    InvalidConfig(&'static str),
    /// Operation refers to a node id with no registered host.
    UnknownHost(u16),
    /// Operation refers to a link slot that is out of range or empty.
    InvalidLink(u8),

    // ========================================================================
    // State errors
    // ========================================================================
    /// Operation refused because live resources remain (e.g. freeing a
    /// handle that still has hosts, removing a host with enabled links).
    Busy,
    /// Operation is forbidden in the current state (e.g. installing a
    /// crypto transform while forwarding is enabled).
    InvalidState(&'static str),

    // ========================================================================
    // Resource errors
    // ========================================================================
    /// The liveness notification channel stayed full past the bounded
    /// retry limit.
    NotifyChannelFull,
    /// Underlying I/O failure (socket setup, poller registration).
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidConfig(what) => write!(f, "invalid configuration: {}", what),
            Error::UnknownHost(id) => write!(f, "unknown host id {}", id),
            Error::InvalidLink(id) => write!(f, "invalid link id {}", id),
            Error::Busy => write!(f, "resource busy"),
            Error::InvalidState(what) => write!(f, "invalid state: {}", what),
            Error::NotifyChannelFull => write!(f, "liveness notification channel full"),
            Error::Io(err) => write!(f, "i/o error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}
