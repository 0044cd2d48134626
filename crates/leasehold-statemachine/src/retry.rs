// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-entity retry delay.
//!
//! An entity that failed in its current state (`state_count > 0`) is not
//! processed again until `state_timestamp + delay(state_count)` has passed.

use std::time::Duration;

use leasehold_store::EntityMeta;
use leasehold_store::clock::duration_millis;

/// Exponential delay between attempts on the same entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRetryPolicy {
    base: Duration,
    max: Duration,
}

impl EntityRetryPolicy {
    /// Delay `base` after the first failure, doubling up to `max`.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    /// Delay before attempt number `state_count + 1`.
    pub fn delay(&self, state_count: i32) -> Duration {
        if state_count <= 0 {
            return Duration::ZERO;
        }
        let exponent = u32::try_from(state_count - 1).unwrap_or(u32::MAX);
        let factor = 2u32.saturating_pow(exponent);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Epoch milliseconds at which the entity becomes eligible again.
    pub fn due_at(&self, meta: &EntityMeta) -> i64 {
        meta.state_timestamp
            .saturating_add(duration_millis(self.delay(meta.state_count)))
    }

    /// Whether the entity may be processed at `now`.
    pub fn is_due(&self, meta: &EntityMeta, now: i64) -> bool {
        meta.state_count <= 0 || now >= self.due_at(meta)
    }
}
