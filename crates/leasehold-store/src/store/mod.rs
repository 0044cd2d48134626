// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Entity store abstraction and its backends.
//!
//! This module defines the [`EntityStore`] trait implemented by:
//! - [`memory::InMemoryEntityStore`]: process-local, one mutex around entities and leases
//! - [`sqlite::SqliteEntityStore`]: SQLite via sqlx, `BEGIN IMMEDIATE` transactions
//! - [`postgres::PostgresEntityStore`]: PostgreSQL via sqlx, `SKIP LOCKED` row claiming
//!
//! Every store is also the [`LeaseManager`] for its entity kind. Stores only
//! check leases; they never take one implicitly except in
//! [`EntityStore::next_not_leased`] and [`EntityStore::lease_and_fetch`].

use std::time::Duration;

use async_trait::async_trait;

use crate::entity::StatefulEntity;
use crate::error::Result;
use crate::lease::LeaseManager;
use crate::query::{Criterion, QuerySpec};

pub mod memory;
pub mod postgres;
pub mod sqlite;

/// Lease length used when callers have no specific requirement.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(60);

/// Persistence and claiming of one entity kind.
#[async_trait]
pub trait EntityStore<T: StatefulEntity>: LeaseManager {
    /// Insert or replace the entity with the same id.
    ///
    /// Fails with a lease conflict when another holder has a valid lease.
    /// Stamps `updated_at` and leaves any lease untouched.
    async fn save(&self, entity: &T, holder: &str) -> Result<()>;

    /// Look up one entity by id.
    async fn find_by_id(&self, id: &str) -> Result<Option<T>>;

    /// Entities matching `spec`, leased or not.
    async fn query(&self, spec: &QuerySpec) -> Result<Vec<T>>;

    /// Number of entities matching the criteria of `spec`, ignoring paging.
    async fn count(&self, spec: &QuerySpec) -> Result<u64>;

    /// Atomically claim up to `batch_size` entities matching `criteria` that
    /// carry no valid lease, leasing each to `holder`.
    ///
    /// Results are ordered by `state_timestamp` ascending, then by `id`.
    async fn next_not_leased(
        &self,
        holder: &str,
        batch_size: u32,
        lease_duration: Duration,
        criteria: &[Criterion],
    ) -> Result<Vec<T>>;

    /// Claim up to `batch_size` unleased entities in `state`, oldest first.
    async fn lease_and_fetch(
        &self,
        state: i32,
        holder: &str,
        batch_size: u32,
        lease_duration: Duration,
    ) -> Result<Vec<T>> {
        self.next_not_leased(
            holder,
            batch_size,
            lease_duration,
            &[Criterion::equal("state", state)],
        )
        .await
    }

    /// Remove the entity and its lease.
    ///
    /// Fails with a lease conflict when another holder has a valid lease.
    /// Returns the removed entity, or `None` when it did not exist.
    async fn delete(&self, id: &str, holder: &str) -> Result<Option<T>>;
}

/// Housekeeping used by the cleanup worker.
#[async_trait]
pub trait StoreMaintenance: Send + Sync {
    /// Entity kind being maintained.
    fn kind(&self) -> &str;

    /// Ids of entities in one of `states` whose state timestamp is before
    /// `cutoff`, oldest first, skipping validly leased ones.
    async fn terminal_entities_older_than(
        &self,
        states: &[i32],
        cutoff: i64,
        limit: u32,
    ) -> Result<Vec<String>>;

    /// Delete the given entities together with their leases, skipping any
    /// that became validly leased meanwhile. Returns the number deleted.
    async fn delete_entities_batch(&self, ids: &[String]) -> Result<u64>;

    /// Delete lease rows that expired before `expired_before`.
    async fn purge_expired_leases(&self, expired_before: i64) -> Result<u64>;
}

/// Attach [`crate::query::SqlValue`] binds to a sqlx query in order.
macro_rules! bind_values {
    ($query:expr, $binds:expr) => {{
        let mut query = $query;
        for value in $binds {
            query = match value {
                $crate::query::SqlValue::Text(s) => query.bind(s.clone()),
                $crate::query::SqlValue::Integer(i) => query.bind(*i),
                $crate::query::SqlValue::Float(f) => query.bind(*f),
            };
        }
        query
    }};
}

pub(crate) use bind_values;

/// Row shape shared by both relational stores.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EntityRow {
    pub kind: String,
    pub schema_version: i32,
    pub payload: String,
}
