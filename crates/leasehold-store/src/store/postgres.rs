// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed entity store.
//!
//! Claiming uses `SELECT ... FOR UPDATE OF e SKIP LOCKED`, so concurrent
//! claimers walk past each other's candidate rows instead of blocking. Lease
//! rows are written with a guarded upsert that only applies over an expired
//! lease or the caller's own; candidates whose upsert did not apply are
//! dropped from the result.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};
use tracing::debug;

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
    WHERE resource_kind = $1 AND entity_id = $2
"#;

const SELECT_LEASE_FOR_UPDATE: &str = r#"
    SELECT entity_id, leased_by, leased_at, lease_duration
    FROM entity_leases
    WHERE resource_kind = $1 AND entity_id = $2
    FOR UPDATE
"#;

const UPSERT_LEASE: &str = r#"
    INSERT INTO entity_leases (resource_kind, entity_id, leased_by, leased_at, lease_duration)
    VALUES ($1, $2, $3, $4, $5)
    ON CONFLICT (resource_kind, entity_id) DO UPDATE
    SET leased_by = EXCLUDED.leased_by,
        leased_at = EXCLUDED.leased_at,
        lease_duration = EXCLUDED.lease_duration
    WHERE entity_leases.leased_by = EXCLUDED.leased_by
       OR entity_leases.leased_at + entity_leases.lease_duration <= EXCLUDED.leased_at
"#;

/// PostgreSQL-backed store for one entity kind.
pub struct PostgresEntityStore<T> {
    pool: PgPool,
    clock: Arc<dyn Clock>,
    mapping: FieldMapping,
    _kind: PhantomData<fn() -> T>,
}

impl<T> Clone for PostgresEntityStore<T> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            clock: self.clock.clone(),
            mapping: self.mapping.clone(),
            _kind: PhantomData,
        }
    }
}

impl<T: StatefulEntity> PostgresEntityStore<T> {
    /// Create a store on an already migrated pool.
    pub fn new(pool: PgPool) -> Self {
        Self::with_clock(pool, system_clock())
    }

    /// Create a store reading time from `clock`.
    pub fn with_clock(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            clock,
            mapping: T::field_mapping(),
            _kind: PhantomData,
        }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Housekeeping handle for this store's kind.
    pub fn maintenance(&self) -> PostgresMaintenance {
        PostgresMaintenance::with_clock(self.pool.clone(), T::KIND, self.clock.clone())
    }

    async fn claim_in(
        &self,
        conn: &mut PgConnection,
        holder: &str,
        batch_size: u32,
        duration_ms: i64,
        criteria: &[Criterion],
        now: i64,
    ) -> Result<Vec<T>> {
        let predicates = translate_criteria(criteria, &self.mapping)?;

        let mut builder = SqlBuilder::new(SqlDialect::Postgres);
        builder
            .push(
                "SELECT e.kind, e.schema_version, e.payload::text AS payload \
                 FROM stateful_entities e \
                 LEFT JOIN entity_leases l ON l.resource_kind = e.kind AND l.entity_id = e.id \
                 WHERE e.kind = ",
            )
            .push_bind(SqlValue::Text(T::KIND.to_string()))
            .push(" AND (l.entity_id IS NULL OR l.leased_at + l.lease_duration <= ")
            .push_bind(SqlValue::Integer(now))
            .push(")")
            .push_predicates(&predicates, "e")
            .push(" ORDER BY e.state_timestamp ASC, e.id COLLATE \"C\" ASC LIMIT ")
            .push_bind(SqlValue::Integer(i64::from(batch_size)))
            .push(" FOR UPDATE OF e SKIP LOCKED");
        let (sql, binds) = builder.build();

        let rows = bind_values!(sqlx::query_as::<_, EntityRow>(&sql), &binds)
            .fetch_all(&mut *conn)
            .await?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in rows {
            let entity: T = codec::decode_text(&row.kind, row.schema_version, &row.payload)?;
            let result = sqlx::query(UPSERT_LEASE)
                .bind(T::KIND)
                .bind(entity.id())
                .bind(holder)
                .bind(now)
                .bind(duration_ms)
                .execute(&mut *conn)
                .await?;

            if result.rows_affected() == 0 {
                debug!(
                    kind = T::KIND,
                    entity_id = %entity.id(),
                    "Lease taken concurrently, skipping entity"
                );
                continue;
            }
            claimed.push(entity);
        }
        Ok(claimed)
    }
}

#[async_trait]
impl<T: StatefulEntity> LeaseManager for PostgresEntityStore<T> {
    async fn acquire(&self, entity_id: &str, holder: &str, duration: Duration) -> Result<Lease> {
        let now = self.clock.now_millis();
        let lease = Lease::new(entity_id, holder, now, duration_millis(duration));

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(UPSERT_LEASE)
            .bind(T::KIND)
            .bind(entity_id)
            .bind(holder)
            .bind(lease.leased_at)
            .bind(lease.lease_duration)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            let current = sqlx::query_as::<_, Lease>(SELECT_LEASE)
                .bind(T::KIND)
                .bind(entity_id)
                .fetch_optional(&mut *tx)
                .await?;
            let holder = current.map(|l| l.leased_by).unwrap_or_default();
            return Err(StoreError::lease_conflict(entity_id, holder));
        }

        tx.commit().await?;
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
            sqlx::query("DELETE FROM entity_leases WHERE resource_kind = $1 AND entity_id = $2")
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
            WHERE resource_kind = $1 AND entity_id = $2 AND leased_by = $3
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
impl<T: StatefulEntity> EntityStore<T> for PostgresEntityStore<T> {
    async fn save(&self, entity: &T, holder: &str) -> Result<()> {
        let now = self.clock.now_millis();
        let mut stamped = entity.clone();
        stamped.meta_mut().updated_at = now;
        let encoded = codec::encode(&stamped)?;
        let meta = stamped.meta();

        let mut tx = self.pool.begin().await?;
        lock_entity(&mut tx, T::KIND, &meta.id).await?;
        check_lease(&mut tx, T::KIND, &meta.id, holder, now).await?;

        sqlx::query(
            r#"
            INSERT INTO stateful_entities
                (kind, id, state, state_timestamp, state_count, error_detail,
                 created_at, updated_at, schema_version, payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10::jsonb)
            ON CONFLICT (kind, id) DO UPDATE
            SET state = EXCLUDED.state,
                state_timestamp = EXCLUDED.state_timestamp,
                state_count = EXCLUDED.state_count,
                error_detail = EXCLUDED.error_detail,
                updated_at = EXCLUDED.updated_at,
                schema_version = EXCLUDED.schema_version,
                payload = EXCLUDED.payload
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
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<T>> {
        let row = sqlx::query_as::<_, EntityRow>(
            r#"
            SELECT kind, schema_version, payload::text AS payload
            FROM stateful_entities
            WHERE kind = $1 AND id = $2
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

        let mut builder = SqlBuilder::new(SqlDialect::Postgres);
        builder
            .push(
                "SELECT e.kind, e.schema_version, e.payload::text AS payload \
                 FROM stateful_entities e WHERE e.kind = ",
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

        let mut builder = SqlBuilder::new(SqlDialect::Postgres);
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

        let mut tx = self.pool.begin().await?;
        let claimed = self
            .claim_in(&mut tx, holder, batch_size, duration_ms, criteria, now)
            .await?;
        tx.commit().await?;

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

        let mut tx = self.pool.begin().await?;
        lock_entity(&mut tx, T::KIND, id).await?;
        check_lease(&mut tx, T::KIND, id, holder, now).await?;

        let row = sqlx::query_as::<_, EntityRow>(
            r#"
            DELETE FROM stateful_entities
            WHERE kind = $1 AND id = $2
            RETURNING kind, schema_version, payload::text AS payload
            "#,
        )
        .bind(T::KIND)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM entity_leases WHERE resource_kind = $1 AND entity_id = $2")
            .bind(T::KIND)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        row.map(|r| codec::decode_text(&r.kind, r.schema_version, &r.payload))
            .transpose()
    }
}

/// Housekeeping for one entity kind in a PostgreSQL database.
#[derive(Clone)]
pub struct PostgresMaintenance {
    pool: PgPool,
    kind: String,
    clock: Arc<dyn Clock>,
}

impl PostgresMaintenance {
    /// Maintenance for `kind` on the system clock.
    pub fn new(pool: PgPool, kind: impl Into<String>) -> Self {
        Self::with_clock(pool, kind, system_clock())
    }

    /// Maintenance for `kind` reading time from `clock`.
    pub fn with_clock(pool: PgPool, kind: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            kind: kind.into(),
            clock,
        }
    }
}

#[async_trait]
impl StoreMaintenance for PostgresMaintenance {
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

        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT e.id
            FROM stateful_entities e
            WHERE e.kind = $1
              AND e.state = ANY($2)
              AND e.state_timestamp < $3
              AND NOT EXISTS (
                  SELECT 1 FROM entity_leases l
                  WHERE l.resource_kind = e.kind AND l.entity_id = e.id
                    AND l.leased_at + l.lease_duration > $4
              )
            ORDER BY e.state_timestamp ASC, e.id COLLATE "C" ASC
            LIMIT $5
            "#,
        )
        .bind(&self.kind)
        .bind(states)
        .bind(cutoff)
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn delete_entities_batch(&self, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let now = self.clock.now_millis();

        let mut tx = self.pool.begin().await?;

        let deleted: Vec<(String,)> = sqlx::query_as(
            r#"
            DELETE FROM stateful_entities e
            WHERE e.kind = $1
              AND e.id = ANY($2)
              AND NOT EXISTS (
                  SELECT 1 FROM entity_leases l
                  WHERE l.resource_kind = e.kind AND l.entity_id = e.id
                    AND l.leased_at + l.lease_duration > $3
              )
            RETURNING e.id
            "#,
        )
        .bind(&self.kind)
        .bind(ids)
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        let deleted_ids = deleted.into_iter().map(|(id,)| id).collect::<Vec<_>>();

        sqlx::query("DELETE FROM entity_leases WHERE resource_kind = $1 AND entity_id = ANY($2)")
            .bind(&self.kind)
            .bind(&deleted_ids)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(deleted_ids.len() as u64)
    }

    async fn purge_expired_leases(&self, expired_before: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM entity_leases
            WHERE resource_kind = $1 AND leased_at + lease_duration < $2
            "#,
        )
        .bind(&self.kind)
        .bind(expired_before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

/// Connect to a PostgreSQL URL and run migrations.
pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
        .map_err(|e| {
            StoreError::persistence("connect", format!("Failed to connect to PostgreSQL: {}", e))
        })?;

    migrations::run_postgres(&pool).await?;
    Ok(pool)
}

async fn lock_entity(conn: &mut PgConnection, kind: &str, id: &str) -> Result<()> {
    sqlx::query("SELECT 1 FROM stateful_entities WHERE kind = $1 AND id = $2 FOR UPDATE")
        .bind(kind)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(())
}

async fn check_lease(
    conn: &mut PgConnection,
    kind: &str,
    id: &str,
    holder: &str,
    now: i64,
) -> Result<()> {
    let lease = sqlx::query_as::<_, Lease>(SELECT_LEASE_FOR_UPDATE)
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
