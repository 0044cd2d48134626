// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Leasehold Store - Stateful Entity Persistence with Lease Coordination
//!
//! This crate persists the long-running entities of a connector control plane
//! (contract negotiations, transfer processes, policy definitions) and lets
//! many workers, in one process or many, drive them through their state
//! machines without a central lock service.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │              leasehold-statemachine (runners, workers)            │
//! └──────────────────────────────────────────────────────────────────┘
//!                                 │ lease_and_fetch / save / release
//!                                 ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     EntityStore<T> + LeaseManager                 │
//! │  ┌────────────────┐   ┌────────────────┐   ┌──────────────────┐  │
//! │  │   In-memory    │   │     SQLite     │   │    PostgreSQL    │  │
//! │  │  (one mutex)   │   │ (BEGIN IMMED.) │   │  (SKIP LOCKED)   │  │
//! │  └────────────────┘   └────────────────┘   └──────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//!            │                        │
//!            ▼                        ▼
//! ┌──────────────────────┐  ┌────────────────────────────────────────┐
//! │ query::eval          │  │ query::sql (JSON path operators)       │
//! └──────────────────────┘  └────────────────────────────────────────┘
//!            ▲                        ▲
//!            └──── query::translator ─┘
//!                        ▲
//!                QuerySpec / Criterion
//! ```
//!
//! # Leases
//!
//! A lease is valid while `now < leased_at + lease_duration`. At most one
//! valid lease exists per entity. The holder renews by acquiring again; any
//! holder may take over an expired lease. `break_lease` removes a lease
//! regardless of holder.
//!
//! | Operation | Description |
//! |-----------|-------------|
//! | `acquire` | Grant or renew a lease; conflict if validly held by another |
//! | `is_leased` | Whether a valid lease exists |
//! | `break_lease` | Administrative removal |
//! | `lease_of` | Inspect the stored lease |
//! | `release` | Remove the caller's own lease |
//!
//! # Entity Store
//!
//! | Operation | Description |
//! |-----------|-------------|
//! | `save` | Upsert; conflict if validly leased by another holder |
//! | `find_by_id` | Lookup by id |
//! | `query` / `count` | Filter, sort and page with a [`query::QuerySpec`] |
//! | `lease_and_fetch` | Claim a batch of unleased entities in one state, oldest first |
//! | `next_not_leased` | Claim a batch matching arbitrary criteria |
//! | `delete` | Remove entity and lease |
//!
//! # Configuration
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `LEASEHOLD_DATABASE_URL` | in-memory | `postgres://…` or `sqlite:…` |
//! | `LEASEHOLD_MAX_CONNECTIONS` | `10` | Connection pool size |
//!
//! Time is read from an injected [`clock::Clock`]; the relational stores bind
//! that time into their statements instead of using the database clock.

#![deny(missing_docs)]

/// Injectable time source.
pub mod clock;

/// Entity payload encoding with kind and schema version.
pub mod codec;

/// Store configuration.
pub mod config;

/// Entity model and state bookkeeping.
pub mod entity;

/// Error types.
pub mod error;

/// Leases and the lease manager contract.
pub mod lease;

/// Embedded migrations.
pub mod migrations;

/// Query descriptors, translation and execution.
pub mod query;

/// Entity store trait and backends.
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock, system_clock};
pub use config::{ConfigError, StoreBackend, StoreConfig};
pub use entity::{EntityMeta, StatefulEntity};
pub use error::{Result, StoreError};
pub use lease::{Lease, LeaseManager, LeaseTable};
pub use query::{Criterion, FieldMapping, Operator, QuerySpec, SortOrder};
pub use store::memory::InMemoryEntityStore;
pub use store::postgres::{PostgresEntityStore, PostgresMaintenance};
pub use store::sqlite::{SqliteEntityStore, SqliteMaintenance};
pub use store::{DEFAULT_LEASE_DURATION, EntityStore, StoreMaintenance};
