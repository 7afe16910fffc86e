// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tapmesh.dev

//! Monotonic timestamps for heartbeat scheduling and latency sampling.
//!
//! PING frames carry the sender's raw monotonic clock reading; the peer
//! echoes it untouched in the PONG, so only the original sender ever
//! interprets the value. The struct is therefore never compared across
//! machines.

use std::fmt;

/// A reading of the local `CLOCK_MONOTONIC`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MonotonicTs {
    /// Whole seconds since the (arbitrary) monotonic epoch.
    pub sec: u64,
    /// Nanosecond remainder, < 1_000_000_000.
    pub nsec: u32,
}

impl MonotonicTs {
    /// Read the current monotonic clock.
    #[must_use]
    pub fn now() -> Self {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: clock_gettime FFI with a valid clock id and a pointer to a
        // stack-allocated timespec; cannot fail for CLOCK_MONOTONIC on Linux.
        let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
        debug_assert_eq!(rc, 0);
        Self {
            sec: ts.tv_sec as u64,
            nsec: ts.tv_nsec as u32,
        }
    }

    /// Collapse to microseconds since the monotonic epoch.
    ///
    /// This is the representation stored in the per-link atomic timestamp
    /// fields (`ping_last`, `pong_last`).
    #[must_use]
    pub fn as_micros(self) -> u64 {
        self.sec
            .saturating_mul(1_000_000)
            .saturating_add(u64::from(self.nsec) / 1000)
    }

    /// Microseconds elapsed from `earlier` to `self`, saturating at zero.
    #[must_use]
    pub fn micros_since(self, earlier: MonotonicTs) -> u64 {
        self.as_micros().saturating_sub(earlier.as_micros())
    }
}

impl fmt::Display for MonotonicTs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.sec, self.nsec)
    }
}
