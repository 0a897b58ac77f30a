// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// Retry Backoff
//
// Exponential backoff between reconnection attempts of a stream session.

use std::time::Duration;

/// Maps a failed-attempt count to the wait before the next connection
/// attempt: `min(initial * 2^attempt, max)`.
///
/// With jitter enabled the value is scaled by a random factor in
/// `[0.5, 1.5]` and clamped to `[initial, max]`, so a jittered wait is never
/// shorter than `initial`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    initial: Duration,
    max: Duration,
    jitter: bool,
}

impl BackoffPolicy {
    /// `max` below `initial` is raised to `initial`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            jitter: false,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Unjittered delay for `attempt` (0-indexed).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        if attempt >= u32::BITS {
            return self.max;
        }
        self.initial
            .checked_mul(1u32 << attempt)
            .map_or(self.max, |d| d.min(self.max))
    }

    /// Delay to wait before the next connection attempt.
    pub fn next(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter {
            return base;
        }
        let factor = 0.5 + fastrand::f64();
        base.mul_f64(factor).clamp(self.initial, self.max)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(30))
    }
}
