// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed entity store.
//!
//! Every mutation runs in a `BEGIN IMMEDIATE` transaction, which takes the
//! database write lock up front. The lease check, the claim query and the
//! lease upserts of one call therefore see a consistent snapshot and cannot
//! interleave with another writer.

use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::{debug, warn};

use crate::clock::{Clock, duration_millis, system_clock};
use crate::codec;
use crate::entity::StatefulEntity;
use crate::error::{Result, StoreError};
use crate::lease::{Lease, LeaseManager};
use crate::migrations;
use crate::query::{
    Criterion, FieldMapping, QuerySpec, SqlBuilder, SqlDialect, SqlValue, translate,
    translate_criteria,
};

use super::{EntityRow, EntityStore, StoreMaintenance, bind_values};

const SELECT_LEASE: &str = r#"
    SELECT entity_id, leased_by, leased_at, lease_duration
    FROM entity_leases
    WHERE resource_kind = ?1 AND entity_id = ?2
"#;

const UPSERT_LEASE: &str = r#"
    INSERT INTO entity_leases (resource_kind, entity_id, leased_by, leased_at, lease_duration)
    VALUES (?1, ?2, ?3, ?4, ?5)
    ON CONFLICT (resource_kind, entity_id) DO UPDATE
    SET leased_by = excluded.leased_by,
        leased_at = excluded.leased_at,
        lease_duration = excluded.lease_duration
    WHERE entity_leases.leased_by = excluded.leased_by
       OR entity_leases.leased_at + entity_leases.lease_duration <= excluded.leased_at
"#;

/// SQLite-backed store for one entity kind.
pub struct SqliteEntityStore<T> {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    mapping: FieldMapping,
    _kind: PhantomData<fn() -> T>,
}

impl<T> Clone for SqliteEntityStore<T> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            clock: self.clock.clone(),
            mapping: self.mapping.clone(),
            _kind: PhantomData,
        }
    }
}

impl<T: StatefulEntity> SqliteEntityStore<T> {
    /// Create a store on an already migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_clock(pool, system_clock())
    }

    /// Create a store reading time from `clock`.
    pub fn with_clock(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            clock,
            mapping: T::field_mapping(),
            _kind: PhantomData,
        }
    }

    /// Open (creating if needed) the database file at `path` and migrate it.
    ///
    /// ```ignore
    /// let store = SqliteEntityStore::<TransferProcess>::from_path(".data/leasehold.db").await?;
    /// ```
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let pool = open_pool(path.as_ref()).await?;
        Ok(Self::new(pool))
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Housekeeping handle for this store's kind.
    pub fn maintenance(&self) -> SqliteMaintenance {
        SqliteMaintenance::with_clock(self.pool.clone(), T::KIND, self.clock.clone())
    }

    async fn save_in(
        &self,
        conn: &mut SqliteConnection,
        entity: &T,
        holder: &str,
        now: i64,
    ) -> Result<()> {
        check_lease(conn, T::KIND, entity.id(), holder, now).await?;

        let mut stamped = entity.clone();
        stamped.meta_mut().updated_at = now;
        let encoded = codec::encode(&stamped)?;
        let meta = stamped.meta();

        sqlx::query(
            r#"
            INSERT INTO stateful_entities
                (kind, id, state, state_timestamp, state_count, error_detail,
                 created_at, updated_at, schema_version, payload)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT (kind, id) DO UPDATE
            SET state = excluded.state,
                state_timestamp = excluded.state_timestamp,
                state_count = excluded.state_count,
                error_detail = excluded.error_detail,
                updated_at = excluded.updated_at,
                schema_version = excluded.schema_version,
                payload = excluded.payload
            "#,
        )
        .bind(encoded.kind)
        .bind(&meta.id)
        .bind(meta.state)
        .bind(meta.state_timestamp)
        .bind(meta.state_count)
        .bind(&meta.error_detail)
        .bind(meta.created_at)
        .bind(meta.updated_at)
        .bind(encoded.schema_version)
        .bind(encoded.payload.to_string())
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn claim_in(
        &self,
        conn: &mut SqliteConnection,
        holder: &str,
        batch_size: u32,
        duration_ms: i64,
        criteria: &[Criterion],
        now: i64,
    ) -> Result<Vec<T>> {
        let predicates = translate_criteria(criteria, &self.mapping)?;

        let mut builder = SqlBuilder::new(SqlDialect::Sqlite);
        builder
            .push(
                "SELECT e.kind, e.schema_version, e.payload FROM stateful_entities e \
                 LEFT JOIN entity_leases l ON l.resource_kind = e.kind AND l.entity_id = e.id \
                 WHERE e.kind = ",
            )
            .push_bind(SqlValue::Text(T::KIND.to_string()))
            .push(" AND (l.entity_id IS NULL OR l.leased_at + l.lease_duration <= ")
            .push_bind(SqlValue::Integer(now))
            .push(")")
            .push_predicates(&predicates, "e")
            .push(" ORDER BY e.state_timestamp ASC, e.id ASC LIMIT ")
            .push_bind(SqlValue::Integer(i64::from(batch_size)));
        let (sql, binds) = builder.build();

        let rows = bind_values!(sqlx::query_as::<_, EntityRow>(&sql), &binds)
            .fetch_all(&mut *conn)
            .await?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in rows {
            let entity: T = codec::decode_text(&row.kind, row.schema_version, &row.payload)?;
            sqlx::query(UPSERT_LEASE)
                .bind(T::KIND)
                .bind(entity.id())
                .bind(holder)
                .bind(now)
                .bind(duration_ms)
                .execute(&mut *conn)
                .await?;
            claimed.push(entity);
        }
        Ok(claimed)
    }

    async fn delete_in(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        holder: &str,
        now: i64,
    ) -> Result<Option<T>> {
        check_lease(conn, T::KIND, id, holder, now).await?;

        let row = sqlx::query_as::<_, EntityRow>(
            r#"
            SELECT kind, schema_version, payload
            FROM stateful_entities
            WHERE kind = ?1 AND id = ?2
            "#,
        )
        .bind(T::KIND)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        sqlx::query("DELETE FROM stateful_entities WHERE kind = ?1 AND id = ?2")
            .bind(T::KIND)
            .bind(id)
            .execute(&mut *conn)
            .await?;
        sqlx::query("DELETE FROM entity_leases WHERE resource_kind = ?1 AND entity_id = ?2")
            .bind(T::KIND)
            .bind(id)
            .execute(&mut *conn)
            .await?;

        row.map(|r| codec::decode_text(&r.kind, r.schema_version, &r.payload))
            .transpose()
    }
}

#[async_trait]
impl<T: StatefulEntity> LeaseManager for SqliteEntityStore<T> {
    async fn acquire(&self, entity_id: &str, holder: &str, duration: Duration) -> Result<Lease> {
        let now = self.clock.now_millis();
        let lease = Lease::new(entity_id, holder, now, duration_millis(duration));

        let mut tx = begin_immediate(&self.pool).await?;
        let result = acquire_in(&mut tx, T::KIND, &lease).await;
        finish(tx, result).await?;
        Ok(lease)
    }

    async fn is_leased(&self, entity_id: &str) -> Result<bool> {
        let now = self.clock.now_millis();
        let lease = sqlx::query_as::<_, Lease>(SELECT_LEASE)
            .bind(T::KIND)
            .bind(entity_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(lease.is_some_and(|l| l.is_valid_at(now)))
    }

    async fn break_lease(&self, entity_id: &str) -> Result<()> {
        let result =
            sqlx::query("DELETE FROM entity_leases WHERE resource_kind = ?1 AND entity_id = ?2")
                .bind(T::KIND)
                .bind(entity_id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() > 0 {
            debug!(kind = T::KIND, entity_id = %entity_id, "Lease broken");
        }
        Ok(())
    }

    async fn lease_of(&self, entity_id: &str) -> Result<Option<Lease>> {
        let lease = sqlx::query_as::<_, Lease>(SELECT_LEASE)
            .bind(T::KIND)
            .bind(entity_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(lease)
    }

    async fn release(&self, entity_id: &str, holder: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM entity_leases
            WHERE resource_kind = ?1 AND entity_id = ?2 AND leased_by = ?3
            "#,
        )
        .bind(T::KIND)
        .bind(entity_id)
        .bind(holder)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl<T: StatefulEntity> EntityStore<T> for SqliteEntityStore<T> {
    async fn save(&self, entity: &T, holder: &str) -> Result<()> {
        let now = self.clock.now_millis();
        let mut tx = begin_immediate(&self.pool).await?;
        let result = self.save_in(&mut tx, entity, holder, now).await;
        finish(tx, result).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<T>> {
        let row = sqlx::query_as::<_, EntityRow>(
            r#"
            SELECT kind, schema_version, payload
            FROM stateful_entities
            WHERE kind = ?1 AND id = ?2
            "#,
        )
        .bind(T::KIND)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| codec::decode_text(&r.kind, r.schema_version, &r.payload))
            .transpose()
    }

    async fn query(&self, spec: &QuerySpec) -> Result<Vec<T>> {
        let query = translate(spec, &self.mapping)?;

        let mut builder = SqlBuilder::new(SqlDialect::Sqlite);
        builder
            .push(
                "SELECT e.kind, e.schema_version, e.payload FROM stateful_entities e \
                 WHERE e.kind = ",
            )
            .push_bind(SqlValue::Text(T::KIND.to_string()))
            .push_predicates(&query.predicates, "e")
            .push_order_by(query.sort.as_ref(), "e")
            .push_paging(query.offset, query.limit);
        let (sql, binds) = builder.build();

        let rows = bind_values!(sqlx::query_as::<_, EntityRow>(&sql), &binds)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|r| codec::decode_text(&r.kind, r.schema_version, &r.payload))
            .collect()
    }

    async fn count(&self, spec: &QuerySpec) -> Result<u64> {
        let predicates = translate_criteria(&spec.criteria, &self.mapping)?;

        let mut builder = SqlBuilder::new(SqlDialect::Sqlite);
        builder
            .push("SELECT COUNT(*) FROM stateful_entities e WHERE e.kind = ")
            .push_bind(SqlValue::Text(T::KIND.to_string()))
            .push_predicates(&predicates, "e");
        let (sql, binds) = builder.build();

        let (count,) = bind_values!(sqlx::query_as::<_, (i64,)>(&sql), &binds)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn next_not_leased(
        &self,
        holder: &str,
        batch_size: u32,
        lease_duration: Duration,
        criteria: &[Criterion],
    ) -> Result<Vec<T>> {
        if batch_size == 0 {
            translate_criteria(criteria, &self.mapping)?;
            return Ok(Vec::new());
        }
        let now = self.clock.now_millis();
        let duration_ms = duration_millis(lease_duration);

        let mut tx = begin_immediate(&self.pool).await?;
        let result = self
            .claim_in(&mut tx, holder, batch_size, duration_ms, criteria, now)
            .await;
        let claimed = finish(tx, result).await?;

        if !claimed.is_empty() {
            debug!(
                kind = T::KIND,
                holder = %holder,
                count = claimed.len(),
                "Leased entities"
            );
        }
        Ok(claimed)
    }

    async fn delete(&self, id: &str, holder: &str) -> Result<Option<T>> {
        let now = self.clock.now_millis();
        let mut tx = begin_immediate(&self.pool).await?;
        let result = self.delete_in(&mut tx, id, holder, now).await;
        finish(tx, result).await
    }
}

/// Housekeeping for one entity kind in a SQLite database.
#[derive(Clone)]
pub struct SqliteMaintenance {
    pool: SqlitePool,
    kind: String,
    clock: Arc<dyn Clock>,
}

impl SqliteMaintenance {
    /// Maintenance for `kind` on the system clock.
    pub fn new(pool: SqlitePool, kind: impl Into<String>) -> Self {
        Self::with_clock(pool, kind, system_clock())
    }

    /// Maintenance for `kind` reading time from `clock`.
    pub fn with_clock(pool: SqlitePool, kind: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            kind: kind.into(),
            clock,
        }
    }
}

#[async_trait]
impl StoreMaintenance for SqliteMaintenance {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn terminal_entities_older_than(
        &self,
        states: &[i32],
        cutoff: i64,
        limit: u32,
    ) -> Result<Vec<String>> {
        if states.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let now = self.clock.now_millis();

        let mut builder = SqlBuilder::new(SqlDialect::Sqlite);
        builder
            .push("SELECT e.id FROM stateful_entities e WHERE e.kind = ")
            .push_bind(SqlValue::Text(self.kind.clone()))
            .push(" AND e.state IN (");
        for (i, state) in states.iter().enumerate() {
            if i > 0 {
                builder.push(", ");
            }
            builder.push_bind(SqlValue::Integer(i64::from(*state)));
        }
        builder
            .push(") AND e.state_timestamp < ")
            .push_bind(SqlValue::Integer(cutoff))
            .push(
                " AND NOT EXISTS (SELECT 1 FROM entity_leases l \
                 WHERE l.resource_kind = e.kind AND l.entity_id = e.id \
                 AND l.leased_at + l.lease_duration > ",
            )
            .push_bind(SqlValue::Integer(now))
            .push(") ORDER BY e.state_timestamp ASC, e.id ASC LIMIT ")
            .push_bind(SqlValue::Integer(i64::from(limit)));
        let (sql, binds) = builder.build();

        let rows = bind_values!(sqlx::query_as::<_, (String,)>(&sql), &binds)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn delete_entities_batch(&self, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let now = self.clock.now_millis();

        let mut tx = begin_immediate(&self.pool).await?;
        let result = delete_unleased_in(&mut tx, &self.kind, ids, now).await;
        finish(tx, result).await
    }

    async fn purge_expired_leases(&self, expired_before: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM entity_leases
            WHERE resource_kind = ?1 AND leased_at + lease_duration < ?2
            "#,
        )
        .bind(&self.kind)
        .bind(expired_before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

/// Open a SQLite file, creating parent directories and the file itself, and
/// run migrations.
pub async fn open_pool(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            StoreError::persistence(
                "create_dir",
                format!("Failed to create directory {:?}: {}", parent, e),
            )
        })?;
    }

    let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
    connect(&url, 5).await
}

/// Connect to a SQLite URL and run migrations.
pub async fn connect(url: &str, max_connections: u32) -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
        .map_err(|e| {
            StoreError::persistence(
                "connect",
                format!("Failed to connect to SQLite at {}: {}", url, e),
            )
        })?;

    migrations::run_sqlite(&pool).await?;
    Ok(pool)
}

async fn begin_immediate(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}

async fn finish<R>(tx: Transaction<'static, Sqlite>, result: Result<R>) -> Result<R> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "Failed to roll back SQLite transaction");
            }
            Err(e)
        }
    }
}

async fn check_lease(
    conn: &mut SqliteConnection,
    kind: &str,
    id: &str,
    holder: &str,
    now: i64,
) -> Result<()> {
    let lease = sqlx::query_as::<_, Lease>(SELECT_LEASE)
        .bind(kind)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    match lease {
        Some(lease) if !lease.admits(holder, now) => {
            Err(StoreError::lease_conflict(id, lease.leased_by))
        }
        _ => Ok(()),
    }
}

async fn acquire_in(conn: &mut SqliteConnection, kind: &str, lease: &Lease) -> Result<()> {
    let result = sqlx::query(UPSERT_LEASE)
        .bind(kind)
        .bind(&lease.entity_id)
        .bind(&lease.leased_by)
        .bind(lease.leased_at)
        .bind(lease.lease_duration)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        let current = sqlx::query_as::<_, Lease>(SELECT_LEASE)
            .bind(kind)
            .bind(&lease.entity_id)
            .fetch_optional(&mut *conn)
            .await?;
        let holder = current.map(|l| l.leased_by).unwrap_or_default();
        return Err(StoreError::lease_conflict(&lease.entity_id, holder));
    }
    Ok(())
}

async fn delete_unleased_in(
    conn: &mut SqliteConnection,
    kind: &str,
    ids: &[String],
    now: i64,
) -> Result<u64> {
    let mut deleted = 0u64;
    for id in ids {
        let result = sqlx::query(
            r#"
            DELETE FROM stateful_entities
            WHERE kind = ?1 AND id = ?2
              AND NOT EXISTS (
                  SELECT 1 FROM entity_leases l
                  WHERE l.resource_kind = ?1 AND l.entity_id = ?2
                    AND l.leased_at + l.lease_duration > ?3
              )
            "#,
        )
        .bind(kind)
        .bind(id)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() > 0 {
            deleted += 1;
            sqlx::query("DELETE FROM entity_leases WHERE resource_kind = ?1 AND entity_id = ?2")
                .bind(kind)
                .bind(id)
                .execute(&mut *conn)
                .await?;
        }
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::entity::EntityMeta;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Negotiation {
        #[serde(flatten)]
        meta: EntityMeta,
        counter_party: String,
    }

    impl StatefulEntity for Negotiation {
        const KIND: &'static str = "contract_negotiation";

        fn meta(&self) -> &EntityMeta {
            &self.meta
        }

        fn meta_mut(&mut self) -> &mut EntityMeta {
            &mut self.meta
        }
    }

    fn negotiation(id: &str, state: i32, ts: i64) -> Negotiation {
        Negotiation {
            meta: EntityMeta::new(id, state, ts),
            counter_party: "acme".to_string(),
        }
    }

    /// Create an in-memory SQLite pool for testing.
    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");

        migrations::run_sqlite(&pool)
            .await
            .expect("Failed to run migrations");

        pool
    }

    async fn test_store() -> (SqliteEntityStore<Negotiation>, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        let store = SqliteEntityStore::with_clock(test_pool().await, Arc::new(clock.clone()));
        (store, clock)
    }

    #[tokio::test]
    async fn test_save_and_find() {
        let (store, _clock) = test_store().await;
        store.save(&negotiation("cn-1", 100, 5), "a").await.unwrap();

        let found = store.find_by_id("cn-1").await.unwrap().unwrap();
        assert_eq!(found.meta.updated_at, 1_000_000);
        assert_eq!(found.counter_party, "acme");
        assert!(store.find_by_id("cn-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_upserts() {
        let (store, _clock) = test_store().await;
        let mut entity = negotiation("cn-1", 100, 5);
        store.save(&entity, "a").await.unwrap();

        entity.meta.transition_to(200, 10);
        entity.counter_party = "globex".to_string();
        store.save(&entity, "a").await.unwrap();

        let found = store.find_by_id("cn-1").await.unwrap().unwrap();
        assert_eq!(found.meta.state, 200);
        assert_eq!(found.counter_party, "globex");
        assert_eq!(store.count(&QuerySpec::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_acquire_conflict_names_holder() {
        let (store, clock) = test_store().await;
        store.acquire("cn-1", "a", Duration::from_secs(60)).await.unwrap();

        let err = store
            .acquire("cn-1", "b", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LeaseConflict { ref leased_by, .. } if leased_by == "a"));

        clock.advance(Duration::from_secs(60));
        let lease = store.acquire("cn-1", "b", Duration::from_secs(60)).await.unwrap();
        assert_eq!(lease.leased_by, "b");
        assert_eq!(store.lease_of("cn-1").await.unwrap().unwrap().leased_by, "b");
    }

    #[tokio::test]
    async fn test_failed_transaction_leaves_connection_usable() {
        let (store, _clock) = test_store().await;
        store.acquire("cn-1", "a", Duration::from_secs(60)).await.unwrap();
        assert!(store.save(&negotiation("cn-1", 100, 5), "b").await.is_err());

        // The single pooled connection must not be stuck inside a transaction.
        store.save(&negotiation("cn-2", 100, 5), "b").await.unwrap();
        assert!(store.find_by_id("cn-1").await.unwrap().is_none());
        assert!(store.find_by_id("cn-2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_abandoned_transaction_is_rolled_back() {
        let (store, _clock) = test_store().await;
        {
            let mut tx = begin_immediate(store.pool()).await.unwrap();
            store
                .save_in(&mut tx, &negotiation("cn-1", 100, 5), "a", 1)
                .await
                .unwrap();
        }

        store.save(&negotiation("cn-2", 100, 5), "a").await.unwrap();
        assert!(store.find_by_id("cn-1").await.unwrap().is_none());
        assert!(store.find_by_id("cn-2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_maintenance_deletes_old_terminal_entities() {
        let (store, clock) = test_store().await;
        store.save(&negotiation("old", 800, 10), "s").await.unwrap();
        store.save(&negotiation("leased", 800, 20), "s").await.unwrap();
        store.save(&negotiation("recent", 800, 999_999_999), "s").await.unwrap();
        store.save(&negotiation("active", 100, 10), "s").await.unwrap();
        store.acquire("leased", "w", Duration::from_secs(10)).await.unwrap();

        let maintenance = store.maintenance();
        let ids = maintenance
            .terminal_entities_older_than(&[800, 900], 500_000, 10)
            .await
            .unwrap();
        assert_eq!(ids, vec!["old".to_string()]);
        assert_eq!(maintenance.delete_entities_batch(&ids).await.unwrap(), 1);

        clock.advance(Duration::from_secs(20));
        assert_eq!(
            maintenance
                .purge_expired_leases(clock.now_millis())
                .await
                .unwrap(),
            1
        );
        assert_eq!(store.count(&QuerySpec::new()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_from_path_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("leasehold.db");

        let store = SqliteEntityStore::<Negotiation>::from_path(&path).await.unwrap();
        store.save(&negotiation("cn-1", 100, 5), "a").await.unwrap();
        assert!(path.exists());

        let reopened = SqliteEntityStore::<Negotiation>::from_path(&path).await.unwrap();
        assert!(reopened.find_by_id("cn-1").await.unwrap().is_some());
    }
}
