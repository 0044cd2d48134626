// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for leasehold-store integration tests.
//!
//! Provides a transfer-process entity and the behavioural checks every
//! [`EntityStore`] backend must pass. Each backend's test file builds a store
//! on a [`ManualClock`] and runs these checks against it.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use leasehold_store::query::SortOrder;
use leasehold_store::{
    Clock, Criterion, EntityMeta, EntityStore, FieldMapping, ManualClock, Operator, QuerySpec,
    StatefulEntity, StoreError,
};

pub const INITIAL: i32 = 100;
pub const PROVISIONING: i32 = 200;
pub const COMPLETED: i32 = 800;
pub const FAILED: i32 = 900;

/// Clock start used by every backend test.
pub const START: i64 = 1_700_000_000_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractInfo {
    pub asset_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProcess {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub counter_party_id: String,
    pub contract_info: ContractInfo,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl StatefulEntity for TransferProcess {
    const KIND: &'static str = "transfer_process";

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn field_mapping() -> FieldMapping {
        FieldMapping::base()
            .json_field("counterPartyId")
            .json("assetId", "contractInfo.assetId")
    }
}

pub fn transfer(id: &str, state: i32, state_timestamp: i64) -> TransferProcess {
    TransferProcess {
        meta: EntityMeta::new(id, state, state_timestamp),
        counter_party_id: "urn:connector:provider".to_string(),
        contract_info: ContractInfo {
            asset_id: "asset-1".to_string(),
        },
        properties: BTreeMap::new(),
    }
}

pub fn with_party(mut entity: TransferProcess, party: &str) -> TransferProcess {
    entity.counter_party_id = party.to_string();
    entity
}

/// Six transfers whose properties mix JSON types under the same key:
/// `archived` holds booleans, `size` numbers and a numeric string, `rank`
/// one value of every type.
pub fn typed_property_transfers() -> Vec<TransferProcess> {
    let parties = ["x", "y", "x", "z", "y", "x"];
    let ranks = [
        Some(json!(true)),
        Some(json!(2)),
        Some(json!("b")),
        Some(json!("B")),
        None,
        Some(json!({"level": 1})),
    ];
    parties
        .iter()
        .zip(ranks)
        .enumerate()
        .map(|(i, (party, rank))| {
            let state = INITIAL + (i as i32 % 2) * 100;
            let id = format!("t{}", i);
            let mut entity = with_party(transfer(&id, state, START - i as i64), party);
            entity
                .properties
                .insert("tier".to_string(), json!(format!("gold-{}", i % 3)));
            match i {
                0 => entity.properties.insert("size".to_string(), json!(3)),
                1 => entity.properties.insert("archived".to_string(), json!(true)),
                2 => entity.properties.insert("size".to_string(), json!("3")),
                3 => entity.properties.insert("size".to_string(), json!(1.5)),
                4 => entity.properties.insert("archived".to_string(), json!(false)),
                _ => None,
            };
            if let Some(rank) = rank {
                entity.properties.insert("rank".to_string(), rank);
            }
            entity
        })
        .collect()
}

/// JSON comparisons keep the stored type. Expects the store to hold
/// [`typed_property_transfers`].
pub async fn check_typed_property_queries<S: EntityStore<TransferProcess>>(store: &S) {
    let cases = [
        (Criterion::equal("archived", true), vec!["t1"]),
        (Criterion::equal("archived", 1), vec![]),
        (Criterion::equal("archived", "true"), vec![]),
        (Criterion::like("archived", "true"), vec!["t1"]),
        (Criterion::is_in("archived", [false]), vec!["t4"]),
        (Criterion::equal("size", 3), vec!["t0"]),
        (Criterion::equal("size", "3"), vec!["t2"]),
        (Criterion::like("size", "3"), vec!["t0", "t2"]),
        (Criterion::like("size", "1.%"), vec!["t3"]),
    ];
    for (criterion, expected) in cases {
        let spec = QuerySpec::with_criteria([criterion]).sorted_by("id", SortOrder::Asc);
        let found = store.query(&spec).await.unwrap();
        assert_eq!(ids(&found), expected, "{:?}", spec);
        assert_eq!(store.count(&spec).await.unwrap(), expected.len() as u64);
    }

    // Type first, then value; strings in byte order.
    let sorted = store
        .query(&QuerySpec::new().sorted_by("rank", SortOrder::Asc))
        .await
        .unwrap();
    assert_eq!(ids(&sorted), vec!["t4", "t0", "t1", "t3", "t2", "t5"]);

    let sorted = store
        .query(&QuerySpec::new().sorted_by("rank", SortOrder::Desc))
        .await
        .unwrap();
    assert_eq!(ids(&sorted), vec!["t5", "t2", "t3", "t1", "t0", "t4"]);
}

fn ids(entities: &[TransferProcess]) -> Vec<String> {
    entities.iter().map(|e| e.meta.id.clone()).collect()
}

/// Concrete scenarios 1-3: exclusion, expiry reclaim, stale holder write.
pub async fn check_lease_and_fetch_scenarios<S: EntityStore<TransferProcess>>(
    store: &S,
    clock: &ManualClock,
) {
    let lease = Duration::from_millis(5000);
    store.save(&transfer("T1", INITIAL, START), "creator").await.unwrap();

    // Scenario 1
    let first = store.lease_and_fetch(INITIAL, "w1", 10, lease).await.unwrap();
    assert_eq!(ids(&first), vec!["T1"]);
    let second = store.lease_and_fetch(INITIAL, "w2", 10, lease).await.unwrap();
    assert!(second.is_empty());

    // Scenario 2
    clock.advance(Duration::from_millis(6000));
    let reclaimed = store.lease_and_fetch(INITIAL, "w2", 10, lease).await.unwrap();
    assert_eq!(ids(&reclaimed), vec!["T1"]);
    assert_eq!(store.lease_of("T1").await.unwrap().unwrap().leased_by, "w2");

    // Scenario 3
    let mut stale = first[0].clone();
    stale.meta.transition_to(PROVISIONING, clock_now(clock));
    let err = store.save(&stale, "w1").await.unwrap_err();
    assert!(
        matches!(err, StoreError::LeaseConflict { ref leased_by, .. } if leased_by == "w2"),
        "unexpected error: {err}"
    );
    assert_eq!(store.find_by_id("T1").await.unwrap().unwrap().meta.state, INITIAL);
}

/// Entities with increasing timestamps are handed out oldest first.
pub async fn check_fairness<S: EntityStore<TransferProcess>>(store: &S) {
    for (id, offset) in [("e3", 30), ("e1", 10), ("e4", 40), ("e0", 0), ("e2", 20)] {
        store.save(&transfer(id, INITIAL, START + offset), "creator").await.unwrap();
    }

    let mut order = Vec::new();
    for _ in 0..5 {
        let batch = store
            .lease_and_fetch(INITIAL, "w1", 1, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        order.push(batch[0].meta.id.clone());
    }
    assert_eq!(order, vec!["e0", "e1", "e2", "e3", "e4"]);

    let empty = store
        .lease_and_fetch(INITIAL, "w1", 1, Duration::from_secs(60))
        .await
        .unwrap();
    assert!(empty.is_empty());
}

/// Equal timestamps fall back to id order; other states are left alone.
pub async fn check_batch_ordering_and_state_filter<S: EntityStore<TransferProcess>>(store: &S) {
    store.save(&transfer("b", INITIAL, START), "c").await.unwrap();
    store.save(&transfer("a", INITIAL, START), "c").await.unwrap();
    store.save(&transfer("z", INITIAL, START - 5), "c").await.unwrap();
    store.save(&transfer("p", PROVISIONING, START - 100), "c").await.unwrap();

    let batch = store
        .lease_and_fetch(INITIAL, "w1", 10, Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(ids(&batch), vec!["z", "a", "b"]);
    assert!(!store.is_leased("p").await.unwrap());

    let none = store
        .lease_and_fetch(INITIAL, "w1", 0, Duration::from_secs(60))
        .await
        .unwrap();
    assert!(none.is_empty());
}

/// Holder-checked writes and state bookkeeping.
pub async fn check_write_exclusivity<S: EntityStore<TransferProcess>>(
    store: &S,
    clock: &ManualClock,
) {
    store.save(&transfer("T1", INITIAL, START), "creator").await.unwrap();
    let mut leased = store
        .lease_and_fetch(INITIAL, "w1", 1, Duration::from_secs(60))
        .await
        .unwrap()
        .remove(0);

    let intruder = transfer("T1", FAILED, START);
    let err = store.save(&intruder, "w2").await.unwrap_err();
    assert!(err.is_lease_conflict());
    assert!(err.is_retryable());

    clock.advance(Duration::from_secs(1));
    leased.meta.record_retry(clock_now(clock));
    store.save(&leased, "w1").await.unwrap();
    let stored = store.find_by_id("T1").await.unwrap().unwrap();
    assert_eq!(stored.meta.state_count, 1);
    assert_eq!(stored.meta.state_timestamp, clock_now(clock));
    assert_eq!(stored.meta.updated_at, clock_now(clock));

    clock.advance(Duration::from_secs(1));
    leased.meta.transition_to(PROVISIONING, clock_now(clock));
    store.save(&leased, "w1").await.unwrap();
    let stored = store.find_by_id("T1").await.unwrap().unwrap();
    assert_eq!(stored.meta.state, PROVISIONING);
    assert_eq!(stored.meta.state_count, 0);
    assert_eq!(stored.meta.state_timestamp, clock_now(clock));

    // save never touches the lease
    assert_eq!(store.lease_of("T1").await.unwrap().unwrap().leased_by, "w1");
    assert!(store.release("T1", "w1").await.unwrap());
    store.save(&intruder, "w2").await.unwrap();
}

/// Lease manager contract on a store.
pub async fn check_lease_manager<S: EntityStore<TransferProcess>>(store: &S, clock: &ManualClock) {
    let duration = Duration::from_secs(30);

    assert!(!store.is_leased("L1").await.unwrap());
    let lease = store.acquire("L1", "a", duration).await.unwrap();
    assert_eq!(lease.leased_at, clock_now(clock));
    assert_eq!(lease.lease_duration, 30_000);
    assert!(store.is_leased("L1").await.unwrap());

    let err = store.acquire("L1", "b", duration).await.unwrap_err();
    assert_eq!(err.error_code(), "LEASE_CONFLICT");

    clock.advance(Duration::from_secs(10));
    let renewed = store.acquire("L1", "a", duration).await.unwrap();
    assert_eq!(renewed.leased_at, clock_now(clock));

    clock.advance(Duration::from_secs(25));
    assert!(store.is_leased("L1").await.unwrap());
    clock.advance(Duration::from_secs(5));
    assert!(!store.is_leased("L1").await.unwrap());
    assert!(store.lease_of("L1").await.unwrap().is_some());

    store.acquire("L1", "b", duration).await.unwrap();
    assert!(!store.release("L1", "a").await.unwrap());
    store.break_lease("L1").await.unwrap();
    assert!(!store.is_leased("L1").await.unwrap());
    store.break_lease("L1").await.unwrap();
    store.break_lease("never-leased").await.unwrap();
}

/// Delete honours leases and removes the lease with the entity.
pub async fn check_delete<S: EntityStore<TransferProcess>>(store: &S, clock: &ManualClock) {
    store.save(&transfer("D1", COMPLETED, START), "c").await.unwrap();
    store.acquire("D1", "w1", Duration::from_secs(5)).await.unwrap();

    let err = store.delete("D1", "w2").await.unwrap_err();
    assert!(err.is_lease_conflict());

    let removed = store.delete("D1", "w1").await.unwrap().unwrap();
    assert_eq!(removed.meta.id, "D1");
    assert!(store.find_by_id("D1").await.unwrap().is_none());
    assert!(store.lease_of("D1").await.unwrap().is_none());
    assert!(store.delete("D1", "w1").await.unwrap().is_none());

    store.save(&transfer("D2", COMPLETED, START), "c").await.unwrap();
    store.acquire("D2", "w1", Duration::from_secs(5)).await.unwrap();
    clock.advance(Duration::from_secs(6));
    assert!(store.delete("D2", "w2").await.unwrap().is_some());
}

/// `=`, `in` (union and empty) and `like` over columns, mapped JSON paths and
/// the extension bucket.
pub async fn check_query_round_trip<S: EntityStore<TransferProcess>>(store: &S) {
    let mut x1 = with_party(transfer("q1", INITIAL, START), "x");
    x1.properties.insert("region".to_string(), json!("eu-west"));
    x1.properties.insert("priority".to_string(), json!(3));
    let mut x2 = with_party(transfer("q2", PROVISIONING, START + 1), "x");
    x2.contract_info.asset_id = "asset-2".to_string();
    x2.properties.insert("region".to_string(), json!("eu_central"));
    let y1 = with_party(transfer("q3", INITIAL, START + 2), "y");
    let z1 = with_party(transfer("q4", INITIAL, START + 3), "z");
    for e in [&x1, &x2, &y1, &z1] {
        store.save(e, "c").await.unwrap();
    }

    let spec = QuerySpec::with_criteria([Criterion::equal("counterPartyId", "x")]);
    assert_eq!(ids(&store.query(&spec).await.unwrap()), vec!["q1", "q2"]);
    assert_eq!(store.count(&spec).await.unwrap(), 2);

    let spec = QuerySpec::with_criteria([Criterion::is_in("counterPartyId", ["x", "y"])]);
    assert_eq!(ids(&store.query(&spec).await.unwrap()), vec!["q1", "q2", "q3"]);

    let spec = QuerySpec::with_criteria([Criterion::is_in("counterPartyId", Vec::<String>::new())]);
    assert!(store.query(&spec).await.unwrap().is_empty());
    assert_eq!(store.count(&spec).await.unwrap(), 0);

    let spec = QuerySpec::with_criteria([Criterion::equal("assetId", "asset-2")]);
    assert_eq!(ids(&store.query(&spec).await.unwrap()), vec!["q2"]);

    let spec = QuerySpec::with_criteria([Criterion::equal("region", "eu-west")]);
    assert_eq!(ids(&store.query(&spec).await.unwrap()), vec!["q1"]);

    let spec = QuerySpec::with_criteria([Criterion::equal("priority", 3)]);
    assert_eq!(ids(&store.query(&spec).await.unwrap()), vec!["q1"]);

    // `_` is literal: only the underscore region matches
    let spec = QuerySpec::with_criteria([Criterion::like("region", "eu_%")]);
    assert_eq!(ids(&store.query(&spec).await.unwrap()), vec!["q2"]);

    let spec = QuerySpec::with_criteria([Criterion::like("region", "eu%")]);
    assert_eq!(ids(&store.query(&spec).await.unwrap()), vec!["q1", "q2"]);

    let spec = QuerySpec::with_criteria([
        Criterion::equal("state", INITIAL),
        Criterion::is_in("counterPartyId", ["x", "z"]),
    ]);
    assert_eq!(ids(&store.query(&spec).await.unwrap()), vec!["q1", "q4"]);

    // Unleased query ignores leases
    store.acquire("q1", "w", Duration::from_secs(60)).await.unwrap();
    let spec = QuerySpec::with_criteria([Criterion::equal("counterPartyId", "x")]);
    assert_eq!(store.query(&spec).await.unwrap().len(), 2);
}

/// Concrete scenario 4 plus paging.
pub async fn check_sorted_paging<S: EntityStore<TransferProcess>>(store: &S) {
    for (id, offset) in [("s1", 50), ("s2", 10), ("s3", 40), ("s4", 20), ("s5", 30)] {
        store.save(&transfer(id, INITIAL, START + offset), "c").await.unwrap();
    }
    store.save(&transfer("other", PROVISIONING, START), "c").await.unwrap();

    let spec = QuerySpec::with_criteria([Criterion::equal("state", INITIAL)])
        .sorted_by("stateTimestamp", SortOrder::Asc)
        .with_limit(2);
    assert_eq!(ids(&store.query(&spec).await.unwrap()), vec!["s2", "s4"]);

    let spec = spec.with_offset(2);
    assert_eq!(ids(&store.query(&spec).await.unwrap()), vec!["s5", "s3"]);

    let spec = QuerySpec::with_criteria([Criterion::equal("state", INITIAL)])
        .sorted_by("stateTimestamp", SortOrder::Desc)
        .with_limit(3);
    assert_eq!(ids(&store.query(&spec).await.unwrap()), vec!["s1", "s3", "s5"]);

    assert_eq!(
        store
            .count(&QuerySpec::with_criteria([Criterion::equal("state", INITIAL)]).with_limit(1))
            .await
            .unwrap(),
        5
    );

    let page = store.query(&QuerySpec::new().with_limit(4)).await.unwrap();
    assert_eq!(ids(&page), vec!["other", "s1", "s2", "s3"]);
}

/// Malformed queries fail before touching storage.
pub async fn check_query_validation<S: EntityStore<TransferProcess>>(store: &S) {
    let cases = [
        QuerySpec::with_criteria([Criterion::new("state", Operator::In, 100)]),
        QuerySpec::with_criteria([Criterion::new(
            "counterPartyId",
            Operator::Eq,
            json!(["x"]),
        )]),
        QuerySpec::with_criteria([Criterion::equal("state", "one hundred")]),
        QuerySpec::with_criteria([Criterion::equal("a'b", 1)]),
        QuerySpec::new().with_limit(0),
    ];
    for spec in cases {
        let err = store.query(&spec).await.unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR", "{err}");
        assert!(!err.is_retryable());
    }

    let err = store
        .next_not_leased(
            "w",
            5,
            Duration::from_secs(1),
            &[Criterion::new("state", Operator::Like, 1)],
        )
        .await;
    assert!(err.is_err());
}

/// Claiming with arbitrary criteria.
pub async fn check_next_not_leased<S: EntityStore<TransferProcess>>(store: &S) {
    store.save(&with_party(transfer("n1", INITIAL, START + 2), "x"), "c").await.unwrap();
    store.save(&with_party(transfer("n2", PROVISIONING, START + 1), "x"), "c").await.unwrap();
    store.save(&with_party(transfer("n3", INITIAL, START), "y"), "c").await.unwrap();

    let claimed = store
        .next_not_leased(
            "w1",
            10,
            Duration::from_secs(60),
            &[Criterion::equal("counterPartyId", "x")],
        )
        .await
        .unwrap();
    assert_eq!(ids(&claimed), vec!["n2", "n1"]);
    assert!(store.is_leased("n1").await.unwrap());
    assert!(!store.is_leased("n3").await.unwrap());

    let everything = store
        .next_not_leased("w2", 10, Duration::from_secs(60), &[])
        .await
        .unwrap();
    assert_eq!(ids(&everything), vec!["n3"]);
}

/// Concurrent claimers never receive the same entity while its lease is valid.
pub async fn check_concurrent_mutual_exclusion<S>(store: Arc<S>, entities: usize, workers: usize)
where
    S: EntityStore<TransferProcess> + 'static,
{
    for i in 0..entities {
        let id = format!("m{:03}", i);
        store.save(&transfer(&id, INITIAL, START + i as i64), "c").await.unwrap();
    }

    let mut handles = Vec::new();
    for w in 0..workers {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let holder = format!("worker-{}", w);
            let mut mine = Vec::new();
            loop {
                let batch = store
                    .lease_and_fetch(INITIAL, &holder, 3, Duration::from_secs(300))
                    .await
                    .unwrap();
                if batch.is_empty() {
                    break;
                }
                mine.extend(batch.into_iter().map(|e| e.meta.id));
                tokio::task::yield_now().await;
            }
            mine
        }));
    }

    let mut seen = HashSet::new();
    let mut total = 0;
    for handle in handles {
        for id in handle.await.unwrap() {
            total += 1;
            assert!(seen.insert(id.clone()), "{id} was handed out twice");
        }
    }
    assert_eq!(total, entities);
    assert_eq!(seen.len(), entities);
}

fn clock_now(clock: &ManualClock) -> i64 {
    clock.now_millis()
}
