// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Idle wait strategies for polling loops.
//!
//! A loop asks [`WaitStrategy::wait_duration`] after a cycle that found no
//! work and calls [`WaitStrategy::success`] after a cycle that did.

use std::time::Duration;

/// Decides how long a polling loop sleeps between empty cycles.
pub trait WaitStrategy: Send + Sync {
    /// Wait before the next poll after an empty cycle.
    fn wait_duration(&mut self) -> Duration;

    /// A cycle found work.
    fn success(&mut self);
}

/// Same wait after every empty cycle.
#[derive(Debug, Clone)]
pub struct FixedWaitStrategy {
    wait: Duration,
}

impl FixedWaitStrategy {
    /// Wait `wait` after every empty cycle.
    pub fn new(wait: Duration) -> Self {
        Self { wait }
    }
}

impl WaitStrategy for FixedWaitStrategy {
    fn wait_duration(&mut self) -> Duration {
        self.wait
    }

    fn success(&mut self) {}
}

/// Doubles the wait for every consecutive empty cycle, up to a cap.
///
/// The first empty cycle waits `base`; a cycle with work resets the streak.
#[derive(Debug, Clone)]
pub struct ExponentialWaitStrategy {
    base: Duration,
    max: Duration,
    empty_cycles: u32,
}

impl ExponentialWaitStrategy {
    /// Start at `base`, never exceed `max`.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            empty_cycles: 0,
        }
    }

    /// Consecutive empty cycles seen so far.
    pub fn empty_cycles(&self) -> u32 {
        self.empty_cycles
    }
}

impl WaitStrategy for ExponentialWaitStrategy {
    fn wait_duration(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.empty_cycles);
        self.empty_cycles = self.empty_cycles.saturating_add(1);
        self.base.saturating_mul(factor).min(self.max)
    }

    fn success(&mut self) {
        self.empty_cycles = 0;
    }
}
