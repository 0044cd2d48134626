// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory entity store.
//!
//! Entities and leases sit behind one mutex, so every operation, including
//! claim-and-lease in [`EntityStore::next_not_leased`], is a single critical
//! section. Stored entities are clones; callers never share state with the
//! store.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::clock::{Clock, duration_millis, system_clock};
use crate::entity::{EntityMeta, StatefulEntity};
use crate::error::{Result, StoreError};
use crate::lease::{Lease, LeaseManager, LeaseTable};
use crate::query::eval::{self, EntityView};
use crate::query::{Criterion, FieldMapping, QuerySpec, translate, translate_criteria};

use super::{EntityStore, StoreMaintenance};

struct StoredEntity<T> {
    entity: T,
    payload: Value,
}

impl<T: StatefulEntity> StoredEntity<T> {
    fn new(entity: T) -> Result<Self> {
        let payload = serde_json::to_value(&entity)?;
        Ok(Self { entity, payload })
    }

    fn meta(&self) -> &EntityMeta {
        self.entity.meta()
    }

    fn view(&self) -> EntityView<'_> {
        EntityView {
            meta: self.entity.meta(),
            payload: &self.payload,
        }
    }
}

struct Inner<T> {
    entities: BTreeMap<String, StoredEntity<T>>,
    leases: LeaseTable,
}

/// Process-local store for one entity kind.
pub struct InMemoryEntityStore<T> {
    inner: Mutex<Inner<T>>,
    clock: Arc<dyn Clock>,
    mapping: FieldMapping,
    _kind: PhantomData<fn() -> T>,
}

impl<T: StatefulEntity> Default for InMemoryEntityStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: StatefulEntity> InMemoryEntityStore<T> {
    /// Empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    /// Empty store reading time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entities: BTreeMap::new(),
                leases: LeaseTable::new(),
            }),
            clock,
            mapping: T::field_mapping(),
            _kind: PhantomData,
        }
    }

    /// Number of stored entities.
    pub fn len(&self) -> usize {
        self.lock().map(|inner| inner.entities.len()).unwrap_or(0)
    }

    /// True when no entity is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner<T>>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::persistence("lock", "in-memory store mutex poisoned"))
    }
}

#[async_trait]
impl<T: StatefulEntity> LeaseManager for InMemoryEntityStore<T> {
    async fn acquire(&self, entity_id: &str, holder: &str, duration: Duration) -> Result<Lease> {
        let now = self.clock.now_millis();
        let mut inner = self.lock()?;
        inner
            .leases
            .acquire(entity_id, holder, duration_millis(duration), now)
    }

    async fn is_leased(&self, entity_id: &str) -> Result<bool> {
        let now = self.clock.now_millis();
        Ok(self.lock()?.leases.is_leased(entity_id, now))
    }

    async fn break_lease(&self, entity_id: &str) -> Result<()> {
        if let Some(lease) = self.lock()?.leases.remove(entity_id) {
            debug!(entity_id = %entity_id, leased_by = %lease.leased_by, "Lease broken");
        }
        Ok(())
    }

    async fn lease_of(&self, entity_id: &str) -> Result<Option<Lease>> {
        Ok(self.lock()?.leases.get(entity_id).cloned())
    }

    async fn release(&self, entity_id: &str, holder: &str) -> Result<bool> {
        Ok(self.lock()?.leases.release(entity_id, holder))
    }
}

#[async_trait]
impl<T: StatefulEntity> EntityStore<T> for InMemoryEntityStore<T> {
    async fn save(&self, entity: &T, holder: &str) -> Result<()> {
        let now = self.clock.now_millis();
        let id = entity.id().to_string();

        let mut stamped = entity.clone();
        stamped.meta_mut().updated_at = now;
        let stored = StoredEntity::new(stamped)?;

        let mut inner = self.lock()?;
        inner.leases.check(&id, holder, now)?;
        inner.entities.insert(id, stored);
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<T>> {
        Ok(self.lock()?.entities.get(id).map(|s| s.entity.clone()))
    }

    async fn query(&self, spec: &QuerySpec) -> Result<Vec<T>> {
        let query = translate(spec, &self.mapping)?;
        let inner = self.lock()?;
        let selected = eval::execute(&query, inner.entities.values(), StoredEntity::view);
        Ok(selected.into_iter().map(|s| s.entity.clone()).collect())
    }

    async fn count(&self, spec: &QuerySpec) -> Result<u64> {
        let predicates = translate_criteria(&spec.criteria, &self.mapping)?;
        let inner = self.lock()?;
        let matched = eval::count(&predicates, inner.entities.values(), StoredEntity::view);
        Ok(matched as u64)
    }

    async fn next_not_leased(
        &self,
        holder: &str,
        batch_size: u32,
        lease_duration: Duration,
        criteria: &[Criterion],
    ) -> Result<Vec<T>> {
        let predicates = translate_criteria(criteria, &self.mapping)?;
        if batch_size == 0 {
            return Ok(Vec::new());
        }
        let now = self.clock.now_millis();
        let duration_ms = duration_millis(lease_duration);

        let mut guard = self.lock()?;
        let inner = &mut *guard;

        let mut candidates = inner
            .entities
            .values()
            .filter(|s| !inner.leases.is_leased(&s.meta().id, now))
            .filter(|s| eval::matches_all(&predicates, &s.view()))
            .collect::<Vec<_>>();
        candidates.sort_by(|a, b| {
            a.meta()
                .state_timestamp
                .cmp(&b.meta().state_timestamp)
                .then_with(|| a.meta().id.cmp(&b.meta().id))
        });
        candidates.truncate(batch_size as usize);

        let claimed = candidates
            .into_iter()
            .map(|s| s.entity.clone())
            .collect::<Vec<_>>();
        for entity in &claimed {
            inner.leases.acquire(entity.id(), holder, duration_ms, now)?;
        }

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
        let mut inner = self.lock()?;
        inner.leases.check(id, holder, now)?;
        let removed = inner.entities.remove(id).map(|s| s.entity);
        inner.leases.remove(id);
        Ok(removed)
    }
}

#[async_trait]
impl<T: StatefulEntity> StoreMaintenance for InMemoryEntityStore<T> {
    fn kind(&self) -> &str {
        T::KIND
    }

    async fn terminal_entities_older_than(
        &self,
        states: &[i32],
        cutoff: i64,
        limit: u32,
    ) -> Result<Vec<String>> {
        let now = self.clock.now_millis();
        let inner = self.lock()?;
        let mut expired = inner
            .entities
            .values()
            .map(StoredEntity::meta)
            .filter(|m| states.contains(&m.state) && m.state_timestamp < cutoff)
            .filter(|m| !inner.leases.is_leased(&m.id, now))
            .collect::<Vec<_>>();
        expired.sort_by(|a, b| {
            a.state_timestamp
                .cmp(&b.state_timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(expired
            .into_iter()
            .take(limit as usize)
            .map(|m| m.id.clone())
            .collect())
    }

    async fn delete_entities_batch(&self, ids: &[String]) -> Result<u64> {
        let now = self.clock.now_millis();
        let mut inner = self.lock()?;
        let mut deleted = 0u64;
        for id in ids {
            if inner.leases.is_leased(id, now) {
                continue;
            }
            if inner.entities.remove(id).is_some() {
                deleted += 1;
            }
            inner.leases.remove(id);
        }
        Ok(deleted)
    }

    async fn purge_expired_leases(&self, expired_before: i64) -> Result<u64> {
        let purged = self.lock()?.leases.purge_expired_before(expired_before);
        Ok(purged as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::query::SortOrder;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Transfer {
        #[serde(flatten)]
        meta: EntityMeta,
        counter_party_id: String,
    }

    impl StatefulEntity for Transfer {
        const KIND: &'static str = "transfer_process";

        fn meta(&self) -> &EntityMeta {
            &self.meta
        }

        fn meta_mut(&mut self) -> &mut EntityMeta {
            &mut self.meta
        }

        fn field_mapping() -> FieldMapping {
            FieldMapping::base().json_field("counterPartyId")
        }
    }

    fn transfer(id: &str, state: i32, ts: i64, party: &str) -> Transfer {
        Transfer {
            meta: EntityMeta::new(id, state, ts),
            counter_party_id: party.to_string(),
        }
    }

    fn store() -> (InMemoryEntityStore<Transfer>, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        let store = InMemoryEntityStore::with_clock(Arc::new(clock.clone()));
        (store, clock)
    }

    #[tokio::test]
    async fn test_save_stamps_updated_at_and_returns_copies() {
        let (store, clock) = store();
        clock.set(2_000_000);
        store.save(&transfer("t1", 100, 5, "acme"), "a").await.unwrap();

        let found = store.find_by_id("t1").await.unwrap().unwrap();
        assert_eq!(found.meta.updated_at, 2_000_000);
        assert_eq!(found.counter_party_id, "acme");
        assert!(store.find_by_id("missing").await.unwrap().is_none());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_lease_and_fetch_orders_by_state_timestamp() {
        let (store, _clock) = store();
        store.save(&transfer("b", 100, 20, "x"), "s").await.unwrap();
        store.save(&transfer("a", 100, 20, "x"), "s").await.unwrap();
        store.save(&transfer("c", 100, 10, "x"), "s").await.unwrap();
        store.save(&transfer("d", 200, 1, "x"), "s").await.unwrap();

        let batch = store
            .lease_and_fetch(100, "w1", 2, Duration::from_secs(60))
            .await
            .unwrap();
        let ids = batch.iter().map(|t| t.id().to_string()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["c", "a"]);
        assert!(store.is_leased("c").await.unwrap());
        assert!(!store.is_leased("b").await.unwrap());

        let rest = store
            .lease_and_fetch(100, "w2", 10, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id(), "b");
    }

    #[tokio::test]
    async fn test_query_sort_and_count() {
        let (store, _clock) = store();
        store.save(&transfer("a", 100, 30, "acme"), "s").await.unwrap();
        store.save(&transfer("b", 100, 10, "globex"), "s").await.unwrap();
        store.save(&transfer("c", 200, 20, "acme"), "s").await.unwrap();

        let spec = QuerySpec::with_criteria([Criterion::equal("counterPartyId", "acme")])
            .sorted_by("stateTimestamp", SortOrder::Desc);
        let found = store.query(&spec).await.unwrap();
        assert_eq!(
            found.iter().map(|t| t.id()).collect::<Vec<_>>(),
            vec!["a", "c"]
        );
        assert_eq!(store.count(&spec.with_limit(1)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_delete_respects_lease() {
        let (store, clock) = store();
        store.save(&transfer("t1", 100, 5, "acme"), "a").await.unwrap();
        store.acquire("t1", "a", Duration::from_secs(60)).await.unwrap();

        let err = store.delete("t1", "b").await.unwrap_err();
        assert!(err.is_lease_conflict());

        clock.advance(Duration::from_secs(61));
        let removed = store.delete("t1", "b").await.unwrap();
        assert_eq!(removed.unwrap().id(), "t1");
        assert!(store.lease_of("t1").await.unwrap().is_none());
        assert!(store.delete("t1", "b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_maintenance_skips_leased_entities() {
        let (store, clock) = store();
        store.save(&transfer("done-1", 800, 10, "x"), "s").await.unwrap();
        store.save(&transfer("done-2", 800, 20, "x"), "s").await.unwrap();
        store.save(&transfer("live", 100, 5, "x"), "s").await.unwrap();
        store.acquire("done-2", "w", Duration::from_secs(60)).await.unwrap();

        let ids = store
            .terminal_entities_older_than(&[800], 1_000, 10)
            .await
            .unwrap();
        assert_eq!(ids, vec!["done-1".to_string()]);
        assert_eq!(store.delete_entities_batch(&ids).await.unwrap(), 1);

        clock.advance(Duration::from_secs(120));
        assert_eq!(store.purge_expired_leases(clock.now_millis()).await.unwrap(), 1);
        assert_eq!(store.len(), 2);
    }
}
