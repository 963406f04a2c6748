// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Retry and renewal scheduling.
//!
//! Two independent schedules are derived here:
//!
//! - [`Backoff`]: exponential delay after consecutive failures, doubling from
//!   `min` up to `max` with a uniformly random draw below the ceiling.
//! - [`renewal_sleep`]: how long to wait before renewing a lease of a given
//!   duration, re-randomized on every call so that many sidecars sharing one
//!   vault role spread their renewals out.

use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::constants::{BACKOFF_MAX, BACKOFF_MIN};

/// Exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    attempt: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BACKOFF_MIN, BACKOFF_MAX)
    }
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
            attempt: 0,
        }
    }

    /// Upper bound for the delay after `attempt` consecutive failures:
    /// `min(max, min * 2^attempt)`.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.min.checked_mul(factor).unwrap_or(self.max).min(self.max)
    }

    /// Returns the delay for the current failure and advances the attempt counter.
    ///
    /// The delay is drawn uniformly from `[min, ceiling(attempt)]`, so the first
    /// delay after a [`reset`](Backoff::reset) is always exactly `min`.
    pub fn next_delay(&mut self) -> Duration {
        let ceiling = self.ceiling(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        let spread = ceiling.saturating_sub(self.min);
        self.min + spread.mul_f64(fastrand::f64())
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Time to wait before renewing a lease of duration `lease`.
///
/// One third of the lease scaled by a factor drawn uniformly from
/// `[0.75, 1.25)`: renewal happens between 25% and ~42% of the lease.
pub fn renewal_sleep(lease: Duration) -> Duration {
    let jitter = (fastrand::f64() + 1.5) / 2.0;
    lease.mul_f64(jitter / 3.0)
}

/// Sleeps for `duration` unless `token` is cancelled first.
///
/// Returns `true` when the sleep was cut short by cancellation.
pub async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        () = token.cancelled() => true,
        () = sleep(duration) => false,
    }
}
