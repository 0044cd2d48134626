// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker for removing finished entities.
//!
//! Entities of one kind that sit in a terminal state longer than the
//! retention period are deleted in batches, oldest first. Entities under a
//! valid lease are skipped. Lease rows that expired more than one poll
//! interval ago are purged in the same cycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, error, info};

use leasehold_store::clock::duration_millis;
use leasehold_store::{Clock, ConfigError, StoreMaintenance, system_clock};

use crate::config::env_or;
use crate::error::Result;

/// Configuration for the cleanup worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupWorkerConfig {
    /// Whether cleanup is enabled.
    pub enabled: bool,
    /// Entity kind to clean up.
    pub kind: Option<String>,
    /// State codes considered final.
    pub terminal_states: Vec<i32>,
    /// How often to run cleanup.
    pub poll_interval: Duration,
    /// Time an entity stays in a terminal state before deletion.
    pub max_age: Duration,
    /// Maximum entities deleted per batch.
    pub batch_size: u32,
}

impl Default for CleanupWorkerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            kind: None,
            terminal_states: Vec::new(),
            poll_interval: Duration::from_secs(3600),     // 1 hour
            max_age: Duration::from_secs(30 * 24 * 3600), // 30 days
            batch_size: 100,
        }
    }
}

impl CleanupWorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `LEASEHOLD_CLEANUP_ENABLED`: "true" or "1" to enable (default: false)
    /// - `LEASEHOLD_CLEANUP_KIND`: entity kind (required when enabled)
    /// - `LEASEHOLD_CLEANUP_TERMINAL_STATES`: comma separated state codes (required when enabled)
    /// - `LEASEHOLD_CLEANUP_POLL_INTERVAL_SECS`: seconds between runs (default: 3600)
    /// - `LEASEHOLD_CLEANUP_MAX_AGE_DAYS`: retention in days (default: 30)
    /// - `LEASEHOLD_CLEANUP_BATCH_SIZE`: entities per batch (default: 100)
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        let enabled = std::env::var("LEASEHOLD_CLEANUP_ENABLED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let kind = std::env::var("LEASEHOLD_CLEANUP_KIND")
            .ok()
            .filter(|k| !k.trim().is_empty());

        let terminal_states = match std::env::var("LEASEHOLD_CLEANUP_TERMINAL_STATES") {
            Ok(raw) => parse_states(&raw).ok_or(ConfigError::Invalid(
                "LEASEHOLD_CLEANUP_TERMINAL_STATES",
                "must be a comma separated list of integers",
            ))?,
            Err(_) => Vec::new(),
        };

        let poll_interval_secs: u64 = env_or(
            "LEASEHOLD_CLEANUP_POLL_INTERVAL_SECS",
            3600,
            "must be a non-negative integer",
        )?;
        let max_age_days: u64 = env_or(
            "LEASEHOLD_CLEANUP_MAX_AGE_DAYS",
            30,
            "must be a non-negative integer",
        )?;
        let max_age_secs = max_age_days.checked_mul(86_400).ok_or(ConfigError::Invalid(
            "LEASEHOLD_CLEANUP_MAX_AGE_DAYS",
            "is too large",
        ))?;
        let batch_size: u32 = env_or(
            "LEASEHOLD_CLEANUP_BATCH_SIZE",
            100,
            "must be a positive integer",
        )?;
        if batch_size == 0 {
            return Err(ConfigError::Invalid(
                "LEASEHOLD_CLEANUP_BATCH_SIZE",
                "must be a positive integer",
            ));
        }

        if enabled {
            if kind.is_none() {
                return Err(ConfigError::Missing("LEASEHOLD_CLEANUP_KIND"));
            }
            if terminal_states.is_empty() {
                return Err(ConfigError::Missing("LEASEHOLD_CLEANUP_TERMINAL_STATES"));
            }
        }

        Ok(Self {
            enabled,
            kind,
            terminal_states,
            poll_interval: Duration::from_secs(poll_interval_secs),
            max_age: Duration::from_secs(max_age_secs),
            batch_size,
        })
    }
}

fn parse_states(raw: &str) -> Option<Vec<i32>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().ok())
        .collect()
}

/// Totals from one cleanup cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    /// Entities deleted.
    pub entities_deleted: u64,
    /// Expired lease rows removed.
    pub leases_purged: u64,
}

/// Background worker that deletes old terminal entities.
pub struct CleanupWorker {
    store: Arc<dyn StoreMaintenance>,
    config: CleanupWorkerConfig,
    clock: Arc<dyn Clock>,
    shutdown: Arc<Notify>,
}

impl CleanupWorker {
    /// Create a new cleanup worker.
    pub fn new(store: Arc<dyn StoreMaintenance>, config: CleanupWorkerConfig) -> Self {
        Self::with_clock(store, config, system_clock())
    }

    /// Create a cleanup worker reading time from `clock`.
    pub fn with_clock(
        store: Arc<dyn StoreMaintenance>,
        config: CleanupWorkerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            config,
            clock,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the cleanup worker loop.
    ///
    /// The loop exits when the shutdown signal is received.
    pub async fn run(&self) {
        if !self.config.enabled {
            info!("Cleanup worker disabled");
            return;
        }

        info!(
            kind = %self.store.kind(),
            terminal_states = ?self.config.terminal_states,
            poll_interval_secs = self.config.poll_interval.as_secs(),
            max_age_days = self.config.max_age.as_secs() / 86400,
            batch_size = self.config.batch_size,
            "Cleanup worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Cleanup worker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.run_cycle().await {
                        error!(error = %e, "Failed to clean up terminal entities");
                    }
                }
            }
        }

        info!("Cleanup worker stopped");
    }

    /// Run one cleanup cycle.
    pub async fn run_cycle(&self) -> Result<CleanupReport> {
        let now = self.clock.now_millis();
        let cutoff = now.saturating_sub(duration_millis(self.config.max_age));

        let mut report = CleanupReport::default();

        loop {
            let ids = self
                .store
                .terminal_entities_older_than(
                    &self.config.terminal_states,
                    cutoff,
                    self.config.batch_size,
                )
                .await?;

            if ids.is_empty() {
                break;
            }

            let batch_size = ids.len();
            let deleted = self.store.delete_entities_batch(&ids).await?;
            report.entities_deleted += deleted;

            debug!(
                batch_size = batch_size,
                deleted = deleted,
                total_deleted = report.entities_deleted,
                "Cleaned up batch of entities"
            );

            // Fewer than batch_size means nothing older is left; a batch that
            // deleted nothing was fully re-leased meanwhile.
            if batch_size < self.config.batch_size as usize || deleted == 0 {
                break;
            }
        }

        let lease_cutoff = now.saturating_sub(duration_millis(self.config.poll_interval));
        report.leases_purged = self.store.purge_expired_leases(lease_cutoff).await?;

        if report.entities_deleted > 0 || report.leases_purged > 0 {
            info!(
                kind = %self.store.kind(),
                entities_deleted = report.entities_deleted,
                leases_purged = report.leases_purged,
                cutoff = %format_millis(cutoff),
                "Cleanup cycle completed"
            );
        } else {
            debug!("Cleanup cycle completed, nothing to remove");
        }

        Ok(report)
    }
}

fn format_millis(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| millis.to_string())
}
