// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Processors: one polling pass over the store.
//!
//! A [`StateProcessor`] claims a batch of entities in one state and applies a
//! [`Transition`] to each. Failures are isolated per entity:
//!
//! | Outcome | Store effect | Lease |
//! |---------|--------------|-------|
//! | transition returns `Ok(updated)` | `updated` saved | released |
//! | transition errors or panics | `state_count + 1` saved in current state | kept until expiry |
//! | more than `max_retries` failures | moved to `failure_state` with error detail | released |
//! | save fails with a persistence error | handled as a transition failure | kept until expiry |
//! | save fails with a lease conflict | nothing, another holder owns the entity | lost |

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use leasehold_store::{Clock, EntityStore, StatefulEntity, StoreError, system_clock};

use crate::config::RunnerConfig;
use crate::error::{Result, RunnerError};
use crate::retry::EntityRetryPolicy;

/// One unit of polling work driven by a runner.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Run one pass and return the number of entities handled.
    ///
    /// Never fails: errors are logged and the pass reports what it managed.
    async fn process(&self) -> usize;
}

/// State transition applied to a leased entity.
///
/// `now` is the processor clock's current time in epoch milliseconds.
#[async_trait]
pub trait Transition<T>: Send + Sync {
    /// Produce the next version of `entity`.
    async fn apply(&self, entity: T, now: i64) -> anyhow::Result<T>;
}

#[async_trait]
impl<T, F, Fut> Transition<T> for F
where
    T: Send + 'static,
    F: Fn(T, i64) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    async fn apply(&self, entity: T, now: i64) -> anyhow::Result<T> {
        (self)(entity, now).await
    }
}

/// What happened to one leased entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityOutcome {
    /// Transition applied and saved; lease released.
    Advanced,
    /// Transition failed; retry recorded, lease kept.
    Retried,
    /// Retries exhausted; entity moved to the failure state.
    Failed,
    /// Retry delay not elapsed; lease released untouched.
    Deferred,
    /// Another holder took the lease before the result was saved.
    LeaseLost,
    /// The failure could not be recorded; the lease will expire.
    Abandoned,
}

/// Drives every entity of one state through a transition.
pub struct StateProcessor<T: StatefulEntity> {
    name: String,
    store: Arc<dyn EntityStore<T>>,
    transition: Arc<dyn Transition<T>>,
    state: i32,
    failure_state: i32,
    holder: String,
    batch_size: u32,
    lease_duration: Duration,
    max_retries: u32,
    retry_policy: Option<EntityRetryPolicy>,
    clock: Arc<dyn Clock>,
}

impl<T: StatefulEntity> StateProcessor<T> {
    /// Create a builder for a processor.
    pub fn builder() -> StateProcessorBuilder<T> {
        StateProcessorBuilder::new()
    }

    /// State this processor claims.
    pub fn state(&self) -> i32 {
        self.state
    }

    /// Lease holder name.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Handle a single leased entity.
    pub async fn handle(&self, entity: T) -> EntityOutcome {
        let now = self.clock.now_millis();
        let id = entity.id().to_string();

        if let Some(policy) = &self.retry_policy
            && !policy.is_due(entity.meta(), now)
        {
            debug!(
                kind = T::KIND,
                entity_id = %id,
                state_count = entity.meta().state_count,
                due_at = policy.due_at(entity.meta()),
                "Retry delay not elapsed, deferring"
            );
            self.release(&id).await;
            return EntityOutcome::Deferred;
        }

        let applied = AssertUnwindSafe(self.transition.apply(entity.clone(), now))
            .catch_unwind()
            .await;

        let updated = match applied {
            Ok(Ok(updated)) => updated,
            Ok(Err(e)) => {
                warn!(
                    kind = T::KIND,
                    entity_id = %id,
                    state = self.state,
                    error = %e,
                    "Transition failed"
                );
                return self.record_failure(entity, format!("{:#}", e)).await;
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    kind = T::KIND,
                    entity_id = %id,
                    state = self.state,
                    panic = %message,
                    "Transition panicked"
                );
                return self
                    .record_failure(entity, format!("transition panicked: {}", message))
                    .await;
            }
        };

        match self.store.save(&updated, &self.holder).await {
            Ok(()) => {
                debug!(
                    kind = T::KIND,
                    entity_id = %id,
                    from_state = self.state,
                    to_state = updated.state(),
                    "Entity advanced"
                );
                self.release(&id).await;
                EntityOutcome::Advanced
            }
            Err(StoreError::LeaseConflict { leased_by, .. }) => {
                warn!(
                    kind = T::KIND,
                    entity_id = %id,
                    leased_by = %leased_by,
                    "Lease lost before save, dropping result"
                );
                EntityOutcome::LeaseLost
            }
            Err(e) => {
                warn!(
                    kind = T::KIND,
                    entity_id = %id,
                    error = %e,
                    "Failed to save transition result"
                );
                self.record_failure(entity, e.to_string()).await
            }
        }
    }

    /// Count a failed attempt on `entity` and persist it.
    async fn record_failure(&self, mut entity: T, detail: String) -> EntityOutcome {
        let now = self.clock.now_millis();
        let id = entity.id().to_string();
        entity.meta_mut().record_retry(now);

        let exhausted = i64::from(entity.meta().state_count) > i64::from(self.max_retries);
        if exhausted {
            entity.meta_mut().fail(self.failure_state, detail, now);
        }

        match self.store.save(&entity, &self.holder).await {
            Ok(()) if exhausted => {
                info!(
                    kind = T::KIND,
                    entity_id = %id,
                    state = self.state,
                    failure_state = self.failure_state,
                    max_retries = self.max_retries,
                    "Retries exhausted, entity failed"
                );
                self.release(&id).await;
                EntityOutcome::Failed
            }
            Ok(()) => {
                debug!(
                    kind = T::KIND,
                    entity_id = %id,
                    state_count = entity.meta().state_count,
                    "Retry recorded"
                );
                EntityOutcome::Retried
            }
            Err(e) if e.is_lease_conflict() => {
                warn!(
                    kind = T::KIND,
                    entity_id = %id,
                    error = %e,
                    "Lease lost while recording failure"
                );
                EntityOutcome::LeaseLost
            }
            Err(e) => {
                error!(
                    kind = T::KIND,
                    entity_id = %id,
                    error = %e,
                    "Failed to record failure, leaving entity to lease expiry"
                );
                EntityOutcome::Abandoned
            }
        }
    }

    async fn release(&self, id: &str) {
        if let Err(e) = self.store.release(id, &self.holder).await {
            warn!(kind = T::KIND, entity_id = %id, error = %e, "Failed to release lease");
        }
    }
}

#[async_trait]
impl<T: StatefulEntity> Processor for StateProcessor<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self) -> usize {
        let batch = match self
            .store
            .lease_and_fetch(self.state, &self.holder, self.batch_size, self.lease_duration)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                error!(
                    processor = %self.name,
                    state = self.state,
                    error = %e,
                    "Failed to lease entities"
                );
                return 0;
            }
        };

        if batch.is_empty() {
            return 0;
        }

        let leased = batch.len();
        let mut handled = 0;
        for entity in batch {
            if self.handle(entity).await != EntityOutcome::Deferred {
                handled += 1;
            }
        }

        debug!(
            processor = %self.name,
            state = self.state,
            leased = leased,
            handled = handled,
            "Processed batch"
        );
        handled
    }
}

/// Builder for [`StateProcessor`].
pub struct StateProcessorBuilder<T: StatefulEntity> {
    name: Option<String>,
    store: Option<Arc<dyn EntityStore<T>>>,
    transition: Option<Arc<dyn Transition<T>>>,
    state: Option<i32>,
    failure_state: Option<i32>,
    holder: Option<String>,
    batch_size: u32,
    lease_duration: Duration,
    max_retries: u32,
    retry_policy: Option<EntityRetryPolicy>,
    clock: Option<Arc<dyn Clock>>,
}

impl<T: StatefulEntity> StateProcessorBuilder<T> {
    fn new() -> Self {
        let defaults = RunnerConfig::default();
        Self {
            name: None,
            store: None,
            transition: None,
            state: None,
            failure_state: None,
            holder: Some(defaults.worker_id),
            batch_size: defaults.batch_size,
            lease_duration: defaults.lease_duration,
            max_retries: defaults.max_retries,
            retry_policy: None,
            clock: None,
        }
    }

    /// Set the name used in logs.
    ///
    /// Default: `<kind>:<state>`
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the store to claim from (required).
    pub fn store(mut self, store: Arc<dyn EntityStore<T>>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the transition to apply (required).
    pub fn transition(mut self, transition: impl Transition<T> + 'static) -> Self {
        self.transition = Some(Arc::new(transition));
        self
    }

    /// Set the state to claim (required).
    pub fn state(mut self, state: i32) -> Self {
        self.state = Some(state);
        self
    }

    /// Set the state entities move to after exhausting their retries (required).
    pub fn failure_state(mut self, state: i32) -> Self {
        self.failure_state = Some(state);
        self
    }

    /// Set the lease holder name.
    ///
    /// Default: a generated `leasehold-<uuid>`
    pub fn holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = Some(holder.into());
        self
    }

    /// Apply batch size, lease duration, retries and holder from `config`.
    pub fn config(mut self, config: &RunnerConfig) -> Self {
        self.holder = Some(config.worker_id.clone());
        self.batch_size = config.batch_size;
        self.lease_duration = config.lease_duration;
        self.max_retries = config.max_retries;
        self
    }

    /// Set the maximum batch claimed per pass.
    ///
    /// Default: 20
    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the lease duration requested per claim.
    ///
    /// Default: 60 seconds
    pub fn lease_duration(mut self, duration: Duration) -> Self {
        self.lease_duration = duration;
        self
    }

    /// Set the number of retries before an entity is failed.
    ///
    /// Default: 10
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay repeated attempts on the same entity.
    ///
    /// Default: none, a retried entity is eligible as soon as its lease expires.
    pub fn retry_policy(mut self, policy: EntityRetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Set the time source.
    ///
    /// Default: the system clock
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the processor.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<StateProcessor<T>> {
        let store = self.store.ok_or(RunnerError::Missing("store"))?;
        let transition = self.transition.ok_or(RunnerError::Missing("transition"))?;
        let state = self.state.ok_or(RunnerError::Missing("state"))?;
        let failure_state = self.failure_state.ok_or(RunnerError::Missing("failure_state"))?;
        let holder = self.holder.ok_or(RunnerError::Missing("holder"))?;
        if self.batch_size == 0 {
            return Err(RunnerError::Other("batch_size must be positive".to_string()));
        }

        Ok(StateProcessor {
            name: self.name.unwrap_or_else(|| format!("{}:{}", T::KIND, state)),
            store,
            transition,
            state,
            failure_state,
            holder,
            batch_size: self.batch_size,
            lease_duration: self.lease_duration,
            max_retries: self.max_retries,
            retry_policy: self.retry_policy,
            clock: self.clock.unwrap_or_else(system_clock),
        })
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
