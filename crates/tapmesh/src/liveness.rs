// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tapmesh.dev

//! Link liveness timing: ping cadence, pong timeout, latency EWMA weights.
//!
//! A link is `down` until a PONG round-trip lands under the pong timeout,
//! and flips back to `down` when no PONG is seen for a full timeout. The
//! latency estimate is an exponentially weighted moving average whose
//! history weight is tied to the ping cadence: faster pings carry less
//! history per sample.

/// Per-link timing parameters and derived EWMA weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTiming {
    /// Microseconds between PING emissions.
    pub ping_interval_us: u64,
    /// Microseconds of PONG silence after which the link is declared down.
    pub pong_timeout_us: u64,
    /// EWMA denominator (the configured precision).
    pub latency_fix: u64,
    /// EWMA numerator weight of the historical term.
    pub latency_exp: u64,
}

impl LinkTiming {
    /// Derive timing from operator-facing millisecond settings.
    ///
    /// `latency_exp = precision - (interval_us * precision) / 8_000_000`,
    /// saturating at zero for intervals above eight seconds.
    #[must_use]
    pub fn new(interval_ms: u64, timeout_ms: u64, precision: u64) -> Self {
        let ping_interval_us = interval_ms * 1000;
        let pong_timeout_us = timeout_ms * 1000;
        let latency_exp =
            precision.saturating_sub((ping_interval_us.saturating_mul(precision)) / 8_000_000);
        Self {
            ping_interval_us,
            pong_timeout_us,
            latency_fix: precision,
            latency_exp,
        }
    }

    /// Fold one round-trip sample (microseconds) into the running EWMA.
    #[must_use]
    pub fn ewma(&self, latency_us: u64, sample_us: u64) -> u64 {
        (latency_us * self.latency_exp + sample_us * (self.latency_fix - self.latency_exp))
            / self.latency_fix
    }
}
