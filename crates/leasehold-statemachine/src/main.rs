// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Leasehold Worker - store housekeeping process
//!
//! Connects to the configured store, applies migrations and runs the cleanup
//! worker until Ctrl-C.

use std::sync::Arc;

use tracing::{info, warn};

use leasehold_store::store::{postgres, sqlite};
use leasehold_store::{
    PostgresMaintenance, SqliteMaintenance, StoreBackend, StoreConfig, StoreMaintenance,
};
use leasehold_statemachine::{CleanupWorker, CleanupWorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "leasehold_statemachine=info,leasehold_store=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let store_config = StoreConfig::from_env()?;
    let cleanup_config = CleanupWorkerConfig::from_env()?;

    let Some(kind) = cleanup_config.kind.clone().filter(|_| cleanup_config.enabled) else {
        info!("Cleanup disabled, nothing to do");
        return Ok(());
    };

    let maintenance: Arc<dyn StoreMaintenance> = match store_config.backend()? {
        StoreBackend::InMemory => {
            warn!("No LEASEHOLD_DATABASE_URL set; an in-memory store has nothing to clean");
            return Ok(());
        }
        StoreBackend::Sqlite(url) => {
            let pool = sqlite::connect(&url, store_config.max_connections).await?;
            info!(backend = "sqlite", "Connected to database");
            Arc::new(SqliteMaintenance::new(pool, kind))
        }
        StoreBackend::Postgres(url) => {
            let pool = postgres::connect(&url, store_config.max_connections).await?;
            info!(backend = "postgres", "Connected to database");
            Arc::new(PostgresMaintenance::new(pool, kind))
        }
    };

    info!(kind = %maintenance.kind(), "Starting Leasehold Worker");

    let worker = CleanupWorker::new(maintenance, cleanup_config);
    let shutdown = worker.shutdown_handle();
    let handle = tokio::spawn(async move {
        worker.run().await;
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    shutdown.notify_one();
    handle.await?;

    info!("Leasehold Worker shut down");
    Ok(())
}
