// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for leasehold-statemachine.

use thiserror::Error;

use leasehold_store::{ConfigError, StoreError};

/// Runner and worker errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunnerError {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A store operation failed outside per-entity processing.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Database connection or migration failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A builder was finished without a required part.
    #[error("Missing required component: {0}")]
    Missing(&'static str),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl RunnerError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Store(e) => e.error_code(),
            Self::Database(_) => "DATABASE_ERROR",
            Self::Missing(_) => "MISSING_COMPONENT",
            Self::Other(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type using RunnerError.
pub type Result<T> = std::result::Result<T, RunnerError>;
