// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for leasehold-statemachine integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use leasehold_store::{
    Criterion, EntityMeta, EntityStore, FieldMapping, InMemoryEntityStore, Lease, LeaseManager,
    ManualClock, QuerySpec, Result, StatefulEntity, StoreError,
};

pub const REQUESTED: i32 = 100;
pub const AGREED: i32 = 200;
pub const FINALIZED: i32 = 800;
pub const TERMINATED: i32 = 900;

pub const START: i64 = 1_700_000_000_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractNegotiation {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub counter_party_address: String,
    #[serde(default)]
    pub attempts: u32,
}

impl StatefulEntity for ContractNegotiation {
    const KIND: &'static str = "contract_negotiation";

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn field_mapping() -> FieldMapping {
        FieldMapping::base().json_field("counterPartyAddress")
    }
}

pub fn negotiation(id: &str, state: i32, state_timestamp: i64) -> ContractNegotiation {
    ContractNegotiation {
        meta: EntityMeta::new(id, state, state_timestamp),
        counter_party_address: "https://provider.example/dsp".to_string(),
        attempts: 0,
    }
}

pub fn memory_store(clock: &ManualClock) -> Arc<InMemoryEntityStore<ContractNegotiation>> {
    Arc::new(InMemoryEntityStore::with_clock(Arc::new(clock.clone())))
}

pub async fn seed<S: EntityStore<ContractNegotiation> + ?Sized>(
    store: &S,
    entities: &[ContractNegotiation],
) {
    for entity in entities {
        store.save(entity, "seed").await.unwrap();
    }
}

/// Store wrapper whose next `fail_saves` saves fail with a persistence error.
pub struct FlakyStore<S> {
    inner: Arc<S>,
    fail_saves: AtomicUsize,
    saves: AtomicUsize,
}

impl<S> FlakyStore<S> {
    pub fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            fail_saves: AtomicUsize::new(0),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_saves(&self, n: usize) {
        self.fail_saves.store(n, Ordering::SeqCst);
    }

    pub fn save_attempts(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: LeaseManager> LeaseManager for FlakyStore<S> {
    async fn acquire(&self, entity_id: &str, holder: &str, duration: Duration) -> Result<Lease> {
        self.inner.acquire(entity_id, holder, duration).await
    }

    async fn is_leased(&self, entity_id: &str) -> Result<bool> {
        self.inner.is_leased(entity_id).await
    }

    async fn break_lease(&self, entity_id: &str) -> Result<()> {
        self.inner.break_lease(entity_id).await
    }

    async fn lease_of(&self, entity_id: &str) -> Result<Option<Lease>> {
        self.inner.lease_of(entity_id).await
    }

    async fn release(&self, entity_id: &str, holder: &str) -> Result<bool> {
        self.inner.release(entity_id, holder).await
    }
}

#[async_trait]
impl<T, S> EntityStore<T> for FlakyStore<S>
where
    T: StatefulEntity,
    S: EntityStore<T>,
{
    async fn save(&self, entity: &T, holder: &str) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::persistence("save", "connection reset by peer"));
        }
        self.inner.save(entity, holder).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<T>> {
        self.inner.find_by_id(id).await
    }

    async fn query(&self, spec: &QuerySpec) -> Result<Vec<T>> {
        self.inner.query(spec).await
    }

    async fn count(&self, spec: &QuerySpec) -> Result<u64> {
        self.inner.count(spec).await
    }

    async fn next_not_leased(
        &self,
        holder: &str,
        batch_size: u32,
        lease_duration: Duration,
        criteria: &[Criterion],
    ) -> Result<Vec<T>> {
        self.inner
            .next_not_leased(holder, batch_size, lease_duration, criteria)
            .await
    }

    async fn delete(&self, id: &str, holder: &str) -> Result<Option<T>> {
        self.inner.delete(id, holder).await
    }
}
