// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stateful entity model.
//!
//! Every persisted kind embeds an [`EntityMeta`] (flattened into its JSON form)
//! and implements [`StatefulEntity`]. The state bookkeeping rules live on
//! `EntityMeta` so that every kind progresses the same way.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::query::FieldMapping;

/// State bookkeeping shared by every entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMeta {
    /// Immutable unique id.
    pub id: String,
    /// Kind-specific state code.
    pub state: i32,
    /// Epoch milliseconds of the last state change.
    pub state_timestamp: i64,
    /// Times the entity was re-processed in its current state.
    #[serde(default)]
    pub state_count: i32,
    /// Failure description, set only in failure-adjacent states.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// Epoch milliseconds of creation.
    #[serde(default)]
    pub created_at: i64,
    /// Epoch milliseconds of the last successful save. Stamped by the store.
    #[serde(default)]
    pub updated_at: i64,
}

impl EntityMeta {
    /// Bookkeeping for a freshly created entity.
    pub fn new(id: impl Into<String>, state: i32, now: i64) -> Self {
        Self {
            id: id.into(),
            state,
            state_timestamp: now,
            state_count: 0,
            error_detail: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `state`.
    ///
    /// Re-entering the current state counts a retry; any other state resets
    /// the counter and clears the error detail.
    pub fn transition_to(&mut self, state: i32, now: i64) {
        if state == self.state {
            self.state_count = self.state_count.saturating_add(1);
        } else {
            self.state = state;
            self.state_count = 0;
            self.error_detail = None;
        }
        self.state_timestamp = now;
    }

    /// Record one more processing attempt in the current state.
    pub fn record_retry(&mut self, now: i64) {
        self.transition_to(self.state, now);
    }

    /// Move to a failure state and keep `detail`.
    pub fn fail(&mut self, state: i32, detail: impl Into<String>, now: i64) {
        self.transition_to(state, now);
        self.error_detail = Some(detail.into());
    }

    /// Touch the state timestamp without changing state.
    pub fn update_state_timestamp(&mut self, now: i64) {
        self.state_timestamp = now;
    }
}

/// A persistable entity driven through a state machine.
///
/// Implementors embed an [`EntityMeta`], usually with `#[serde(flatten)]`, and
/// name their resource kind. The kind tags stored rows and leases.
///
/// ```ignore
/// #[derive(Clone, Serialize, Deserialize)]
/// struct TransferProcess {
///     #[serde(flatten)]
///     meta: EntityMeta,
///     counter_party_id: String,
/// }
///
/// impl StatefulEntity for TransferProcess {
///     const KIND: &'static str = "transfer_process";
///     fn meta(&self) -> &EntityMeta { &self.meta }
///     fn meta_mut(&mut self) -> &mut EntityMeta { &mut self.meta }
/// }
/// ```
pub trait StatefulEntity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Resource kind tag, also used as the lease resource kind.
    const KIND: &'static str;

    /// Version of the serialized payload layout.
    const SCHEMA_VERSION: i32 = 1;

    /// Shared bookkeeping.
    fn meta(&self) -> &EntityMeta;

    /// Mutable shared bookkeeping.
    fn meta_mut(&mut self) -> &mut EntityMeta;

    /// Property paths the kind can be queried by.
    fn field_mapping() -> FieldMapping {
        FieldMapping::base()
    }

    /// Rewrite a payload stored under an older `SCHEMA_VERSION`.
    fn upgrade(from_version: i32, body: Value) -> Result<Value, String> {
        let _ = body;
        Err(format!(
            "no upgrade from schema version {} to {}",
            from_version,
            Self::SCHEMA_VERSION
        ))
    }

    /// Entity id.
    fn id(&self) -> &str {
        &self.meta().id
    }

    /// Current state code.
    fn state(&self) -> i32 {
        self.meta().state
    }
}
