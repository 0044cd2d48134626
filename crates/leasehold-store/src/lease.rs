// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Time-bounded exclusive leases.
//!
//! A lease grants one holder the right to mutate an entity until
//! `leased_at + lease_duration`. Leases are never extended in place; the
//! holder re-acquires, which overwrites `leased_at`. Anyone may take over an
//! expired lease.
//!
//! [`LeaseTable`] holds the rules for the in-memory store. The relational
//! stores express the same rules in SQL and bind the same clock value.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// One lease row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    /// Leased entity.
    pub entity_id: String,
    /// Holder identity.
    pub leased_by: String,
    /// Epoch milliseconds when the lease was (re)acquired.
    pub leased_at: i64,
    /// Lease length in milliseconds.
    pub lease_duration: i64,
}

impl Lease {
    /// Create a lease starting at `now`.
    pub fn new(
        entity_id: impl Into<String>,
        leased_by: impl Into<String>,
        now: i64,
        duration_ms: i64,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            leased_by: leased_by.into(),
            leased_at: now,
            lease_duration: duration_ms,
        }
    }

    /// First instant at which the lease is no longer valid.
    pub fn expires_at(&self) -> i64 {
        self.leased_at.saturating_add(self.lease_duration)
    }

    /// `now < leased_at + lease_duration`.
    pub fn is_valid_at(&self, now: i64) -> bool {
        now < self.expires_at()
    }

    /// Whether `holder` owns this lease.
    pub fn is_held_by(&self, holder: &str) -> bool {
        self.leased_by == holder
    }

    /// Whether `holder` may acquire over this lease or write the entity.
    pub fn admits(&self, holder: &str, now: i64) -> bool {
        self.is_held_by(holder) || !self.is_valid_at(now)
    }
}

/// Lease operations, keyed by entity id within one resource kind.
#[async_trait]
pub trait LeaseManager: Send + Sync {
    /// Grant or re-grant a lease to `holder`.
    ///
    /// Succeeds when no lease exists, `holder` already holds it, or the
    /// existing lease expired. Otherwise fails with
    /// [`StoreError::LeaseConflict`] naming the current holder.
    async fn acquire(&self, entity_id: &str, holder: &str, duration: Duration) -> Result<Lease>;

    /// True iff a valid lease exists, regardless of holder.
    async fn is_leased(&self, entity_id: &str) -> Result<bool>;

    /// Remove any lease on the entity. Missing leases are not an error.
    async fn break_lease(&self, entity_id: &str) -> Result<()>;

    /// The stored lease, valid or expired.
    async fn lease_of(&self, entity_id: &str) -> Result<Option<Lease>>;

    /// Remove the lease only if `holder` holds it. Returns whether a lease
    /// was removed.
    async fn release(&self, entity_id: &str, holder: &str) -> Result<bool>;
}

/// In-memory lease map.
#[derive(Debug, Default)]
pub struct LeaseTable {
    leases: HashMap<String, Lease>,
}

impl LeaseTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant a lease per [`LeaseManager::acquire`] rules.
    pub fn acquire(
        &mut self,
        entity_id: &str,
        holder: &str,
        duration_ms: i64,
        now: i64,
    ) -> Result<Lease> {
        self.check(entity_id, holder, now)?;
        let lease = Lease::new(entity_id, holder, now, duration_ms);
        self.leases.insert(entity_id.to_string(), lease.clone());
        Ok(lease)
    }

    /// Fail with a conflict unless `holder` may act on the entity.
    pub fn check(&self, entity_id: &str, holder: &str, now: i64) -> Result<()> {
        match self.leases.get(entity_id) {
            Some(lease) if !lease.admits(holder, now) => {
                Err(StoreError::lease_conflict(entity_id, lease.leased_by.clone()))
            }
            _ => Ok(()),
        }
    }

    /// True iff a valid lease exists.
    pub fn is_leased(&self, entity_id: &str, now: i64) -> bool {
        self.leases
            .get(entity_id)
            .is_some_and(|lease| lease.is_valid_at(now))
    }

    /// Stored lease, valid or expired.
    pub fn get(&self, entity_id: &str) -> Option<&Lease> {
        self.leases.get(entity_id)
    }

    /// Drop the lease irrespective of holder.
    pub fn remove(&mut self, entity_id: &str) -> Option<Lease> {
        self.leases.remove(entity_id)
    }

    /// Drop the lease if `holder` holds it.
    pub fn release(&mut self, entity_id: &str, holder: &str) -> bool {
        if self.leases.get(entity_id).is_some_and(|l| l.is_held_by(holder)) {
            self.leases.remove(entity_id);
            true
        } else {
            false
        }
    }

    /// Drop leases that expired before `cutoff`. Returns how many were removed.
    pub fn purge_expired_before(&mut self, cutoff: i64) -> usize {
        let before = self.leases.len();
        self.leases.retain(|_, lease| lease.expires_at() >= cutoff);
        before - self.leases.len()
    }

    /// Number of stored leases, valid or expired.
    pub fn len(&self) -> usize {
        self.leases.len()
    }

    /// True when no lease is stored.
    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }
}
