// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runner configuration loading from environment variables.

use std::str::FromStr;
use std::time::Duration;

use leasehold_store::ConfigError;

/// Settings shared by every processor a runner drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Lease holder name used by this runner
    pub worker_id: String,
    /// Maximum entities leased per poll
    pub batch_size: u32,
    /// Lease duration requested on every claim
    pub lease_duration: Duration,
    /// Retries in one state before the entity is failed
    pub max_retries: u32,
    /// First wait after an empty cycle
    pub wait_base: Duration,
    /// Upper bound for the wait between empty cycles
    pub wait_max: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            worker_id: generate_worker_id(),
            batch_size: 20,
            lease_duration: Duration::from_millis(60_000),
            max_retries: 10,
            wait_base: Duration::from_millis(100),
            wait_max: Duration::from_millis(5_000),
        }
    }
}

impl RunnerConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `LEASEHOLD_WORKER_ID`: lease holder name (default: `leasehold-<uuid>`)
    /// - `LEASEHOLD_BATCH_SIZE`: entities per poll (default: 20)
    /// - `LEASEHOLD_LEASE_DURATION_MS`: lease duration (default: 60000)
    /// - `LEASEHOLD_MAX_RETRIES`: retries before failing an entity (default: 10)
    /// - `LEASEHOLD_WAIT_BASE_MS`: first idle wait (default: 100)
    /// - `LEASEHOLD_WAIT_MAX_MS`: idle wait cap (default: 5000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let worker_id = std::env::var("LEASEHOLD_WORKER_ID")
            .ok()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(generate_worker_id);

        let batch_size: u32 = env_or("LEASEHOLD_BATCH_SIZE", 20, "must be a positive integer")?;
        if batch_size == 0 {
            return Err(ConfigError::Invalid("LEASEHOLD_BATCH_SIZE", "must be a positive integer"));
        }

        let lease_ms: u64 = env_or(
            "LEASEHOLD_LEASE_DURATION_MS",
            60_000,
            "must be a positive integer",
        )?;
        if lease_ms == 0 {
            return Err(ConfigError::Invalid(
                "LEASEHOLD_LEASE_DURATION_MS",
                "must be a positive integer",
            ));
        }

        let max_retries = env_or("LEASEHOLD_MAX_RETRIES", 10, "must be a non-negative integer")?;
        let wait_base_ms: u64 =
            env_or("LEASEHOLD_WAIT_BASE_MS", 100, "must be a non-negative integer")?;
        let wait_max_ms: u64 =
            env_or("LEASEHOLD_WAIT_MAX_MS", 5_000, "must be a non-negative integer")?;
        if wait_max_ms < wait_base_ms {
            return Err(ConfigError::Invalid(
                "LEASEHOLD_WAIT_MAX_MS",
                "must not be smaller than LEASEHOLD_WAIT_BASE_MS",
            ));
        }

        Ok(Self {
            worker_id,
            batch_size,
            lease_duration: Duration::from_millis(lease_ms),
            max_retries,
            wait_base: Duration::from_millis(wait_base_ms),
            wait_max: Duration::from_millis(wait_max_ms),
        })
    }
}

/// Unique holder name for a runner that was not given one.
pub fn generate_worker_id() -> String {
    format!("leasehold-{}", uuid::Uuid::new_v4())
}

pub(crate) fn env_or<T: FromStr>(
    key: &'static str,
    default: T,
    message: &'static str,
) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key, message)),
        Err(_) => Ok(default),
    }
}
