// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Leasehold State Machine - Lease-driven entity processing
//!
//! Runners poll a [`leasehold_store::EntityStore`] for entities in a given
//! state, lease a bounded batch, apply a transition and persist the result.
//! Any number of runners, in one process or many, may share a store; leases
//! keep each entity with one runner at a time.
//!
//! # Processing loop
//!
//! ```text
//!          ┌───────────────────────────────────────────────┐
//!          │               StateMachineRunner              │
//!          │  for each processor: process() -> handled     │
//!          └───────────────────────────────────────────────┘
//!                 │ handled > 0              │ handled == 0
//!                 ▼                          ▼
//!        wait_strategy.success()   sleep(wait_strategy.wait_duration())
//!        next cycle immediately    or stop on shutdown
//! ```
//!
//! A [`StateProcessor`] isolates failures per entity: an error or panic in a
//! transition bumps the entity's `state_count` and keeps it in its current
//! state; after `max_retries` failures it moves to a failure state.
//!
//! # Configuration
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `LEASEHOLD_WORKER_ID` | `leasehold-<uuid>` | Lease holder name |
//! | `LEASEHOLD_BATCH_SIZE` | `20` | Entities leased per poll |
//! | `LEASEHOLD_LEASE_DURATION_MS` | `60000` | Lease duration |
//! | `LEASEHOLD_MAX_RETRIES` | `10` | Failures before an entity is failed |
//! | `LEASEHOLD_WAIT_BASE_MS` | `100` | First idle wait |
//! | `LEASEHOLD_WAIT_MAX_MS` | `5000` | Idle wait cap |
//! | `LEASEHOLD_CLEANUP_*` | disabled | See [`CleanupWorkerConfig::from_env`] |

#![deny(missing_docs)]

/// Cleanup of old terminal entities.
pub mod cleanup_worker;

/// Runner configuration.
pub mod config;

/// Error types.
pub mod error;

/// Processors and transitions.
pub mod processor;

/// Work-queue batch processing.
pub mod queue;

/// Per-entity retry delays.
pub mod retry;

/// The polling loop.
pub mod runner;

/// Idle wait strategies.
pub mod wait;

pub use cleanup_worker::{CleanupReport, CleanupWorker, CleanupWorkerConfig};
pub use config::RunnerConfig;
pub use error::{Result, RunnerError};
pub use processor::{EntityOutcome, Processor, StateProcessor, StateProcessorBuilder, Transition};
pub use queue::{Drain, QueueProcessor, WorkHandler, WorkQueue};
pub use retry::EntityRetryPolicy;
pub use runner::{RunnerHandle, StateMachineRunner, StateMachineRunnerBuilder};
pub use wait::{ExponentialWaitStrategy, FixedWaitStrategy, WaitStrategy};
