// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for leasehold-store.
//!
//! Every store operation returns [`StoreError`]. Absent entities are not errors;
//! lookups return `Option`.

use thiserror::Error;

/// Result type using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by stores, the lease manager and the query translator.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The entity is validly leased by a different holder.
    #[error("Entity '{entity_id}' is leased by '{leased_by}'")]
    LeaseConflict {
        /// The contested entity.
        entity_id: String,
        /// Holder of the currently valid lease.
        leased_by: String,
    },

    /// A criterion, query or argument is malformed.
    #[error("Validation error for '{field}': {message}")]
    Validation {
        /// The property or argument that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// The backing storage failed.
    #[error("Persistence error during '{operation}': {details}")]
    Persistence {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// A stored payload could not be turned back into its entity type.
    #[error("Cannot decode '{kind}' payload: {message}")]
    Codec {
        /// Entity kind the payload was read for.
        kind: String,
        /// What went wrong.
        message: String,
    },
}

impl StoreError {
    /// Build a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Build a persistence error for the given operation.
    pub fn persistence(operation: impl Into<String>, details: impl ToString) -> Self {
        Self::Persistence {
            operation: operation.into(),
            details: details.to_string(),
        }
    }

    /// Build a lease conflict error.
    pub fn lease_conflict(entity_id: impl Into<String>, leased_by: impl Into<String>) -> Self {
        Self::LeaseConflict {
            entity_id: entity_id.into(),
            leased_by: leased_by.into(),
        }
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::LeaseConflict { .. } => "LEASE_CONFLICT",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Persistence { .. } => "PERSISTENCE_ERROR",
            Self::Codec { .. } => "CODEC_ERROR",
        }
    }

    /// Whether retrying the same call later may succeed.
    ///
    /// Lease conflicts clear once the other holder releases or its lease
    /// expires. Validation and codec failures never clear on their own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LeaseConflict { .. } | Self::Persistence { .. })
    }

    /// True for [`StoreError::LeaseConflict`].
    pub fn is_lease_conflict(&self) -> bool {
        matches!(self, Self::LeaseConflict { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Persistence {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Persistence {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Persistence {
            operation: "migrate".to_string(),
            details: err.to_string(),
        }
    }
}
