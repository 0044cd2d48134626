// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-kind mapping from logical property paths to storage accessors.
//!
//! A [`FieldMapping`] is built once per entity kind. Paths either address one
//! of the fixed [`EntityColumn`]s or a JSON sub-path inside the serialized
//! payload. Kinds may declare an extension bucket (`properties` by default)
//! that absorbs free-form keys without a mapping of their own.

use std::collections::BTreeMap;

use crate::error::{Result, StoreError};

/// Bucket that unmapped top-level paths are retried against.
pub const DEFAULT_EXTENSION_BUCKET: &str = "properties";

/// Storage type of a dedicated column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Text column.
    Text,
    /// 32 or 64 bit integer column.
    Integer,
}

/// Dedicated columns every stateful entity row carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityColumn {
    /// `id`
    Id,
    /// `state`
    State,
    /// `state_timestamp`
    StateTimestamp,
    /// `state_count`
    StateCount,
    /// `error_detail`
    ErrorDetail,
    /// `created_at`
    CreatedAt,
    /// `updated_at`
    UpdatedAt,
}

impl EntityColumn {
    /// Every column, in table order.
    pub const ALL: [EntityColumn; 7] = [
        Self::Id,
        Self::State,
        Self::StateTimestamp,
        Self::StateCount,
        Self::ErrorDetail,
        Self::CreatedAt,
        Self::UpdatedAt,
    ];

    /// SQL column name.
    pub fn column_name(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::State => "state",
            Self::StateTimestamp => "state_timestamp",
            Self::StateCount => "state_count",
            Self::ErrorDetail => "error_detail",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
        }
    }

    /// Logical property path the column is queried by.
    pub fn property_name(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::State => "state",
            Self::StateTimestamp => "stateTimestamp",
            Self::StateCount => "stateCount",
            Self::ErrorDetail => "errorDetail",
            Self::CreatedAt => "createdAt",
            Self::UpdatedAt => "updatedAt",
        }
    }

    /// Declared storage type.
    pub fn column_type(&self) -> ColumnType {
        match self {
            Self::Id | Self::ErrorDetail => ColumnType::Text,
            _ => ColumnType::Integer,
        }
    }
}

/// How a resolved property is read from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldAccessor {
    /// A dedicated column.
    Column(EntityColumn),
    /// A JSON sub-path inside the payload document.
    Json(Vec<String>),
}

impl FieldAccessor {
    /// JSON accessor from path segments.
    pub fn json<S: Into<String>>(segments: impl IntoIterator<Item = S>) -> Self {
        Self::Json(segments.into_iter().map(Into::into).collect())
    }
}

/// Property path → accessor table for one entity kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    fields: BTreeMap<String, FieldAccessor>,
    extension_bucket: Option<String>,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self::base()
    }
}

impl FieldMapping {
    /// Mapping with only the dedicated entity columns and the default
    /// extension bucket.
    pub fn base() -> Self {
        let fields = EntityColumn::ALL
            .iter()
            .map(|c| (c.property_name().to_string(), FieldAccessor::Column(*c)))
            .collect();
        Self {
            fields,
            extension_bucket: Some(DEFAULT_EXTENSION_BUCKET.to_string()),
        }
    }

    /// Map `property` to the JSON payload path given in dot notation.
    pub fn json(mut self, property: impl Into<String>, json_path: &str) -> Self {
        let segments = json_path.split('.').map(str::to_string).collect::<Vec<_>>();
        self.fields
            .insert(property.into(), FieldAccessor::Json(segments));
        self
    }

    /// Map a payload property to the JSON key of the same name.
    pub fn json_field(self, property: &str) -> Self {
        self.json(property, property)
    }

    /// Change the extension bucket; `None` disables the fallback.
    pub fn with_extension_bucket(mut self, bucket: Option<&str>) -> Self {
        self.extension_bucket = bucket.map(str::to_string);
        self
    }

    /// The configured extension bucket.
    pub fn extension_bucket(&self) -> Option<&str> {
        self.extension_bucket.as_deref()
    }

    /// Resolve a logical property path to its accessor.
    ///
    /// Resolution order: exact mapping, then the longest mapped JSON prefix
    /// with the remaining segments appended, then one retry under the
    /// extension bucket.
    pub fn resolve(&self, path: &str) -> Result<FieldAccessor> {
        validate_path(path)?;

        if let Some(accessor) = self.resolve_mapped(path) {
            return Ok(accessor);
        }

        if let Some(bucket) = &self.extension_bucket
            && !path.starts_with(&format!("{}.", bucket))
            && path != bucket
        {
            let extended = format!("{}.{}", bucket, path);
            if let Some(accessor) = self.resolve_mapped(&extended) {
                return Ok(accessor);
            }
            let mut segments = vec![bucket.clone()];
            segments.extend(path.split('.').map(str::to_string));
            return Ok(FieldAccessor::Json(segments));
        }

        Err(StoreError::validation(
            path,
            "unknown property; it is neither mapped nor covered by an extension bucket",
        ))
    }

    fn resolve_mapped(&self, path: &str) -> Option<FieldAccessor> {
        if let Some(accessor) = self.fields.get(path) {
            return Some(accessor.clone());
        }

        let segments = path.split('.').collect::<Vec<_>>();
        for split in (1..segments.len()).rev() {
            let prefix = segments[..split].join(".");
            if let Some(FieldAccessor::Json(base)) = self.fields.get(&prefix) {
                let mut full = base.clone();
                full.extend(segments[split..].iter().map(|s| s.to_string()));
                return Some(FieldAccessor::Json(full));
            }
        }

        None
    }
}

/// Property paths are inlined into SQL JSON-path expressions, so every
/// segment is restricted to identifier characters.
fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(StoreError::validation(
            "operandLeft",
            "property path must not be empty",
        ));
    }
    for segment in path.split('.') {
        let mut chars = segment.chars();
        let valid_start =
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '@');
        if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(StoreError::validation(
                path,
                format!("invalid property path segment '{}'", segment),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer_mapping() -> FieldMapping {
        FieldMapping::base()
            .json_field("counterPartyAddress")
            .json("dataAddress", "dataDestination")
            .json("assetId", "contractInfo.assetId")
    }

    #[test]
    fn test_base_columns_resolve() {
        let mapping = FieldMapping::base();
        assert_eq!(
            mapping.resolve("state").unwrap(),
            FieldAccessor::Column(EntityColumn::State)
        );
        assert_eq!(
            mapping.resolve("stateTimestamp").unwrap(),
            FieldAccessor::Column(EntityColumn::StateTimestamp)
        );
    }

    #[test]
    fn test_json_mapping_and_nested_suffix() {
        let mapping = transfer_mapping();
        assert_eq!(
            mapping.resolve("assetId").unwrap(),
            FieldAccessor::json(["contractInfo", "assetId"])
        );
        assert_eq!(
            mapping.resolve("dataAddress.type").unwrap(),
            FieldAccessor::json(["dataDestination", "type"])
        );
    }

    #[test]
    fn test_unknown_property_falls_back_to_extension_bucket() {
        let mapping = transfer_mapping();
        assert_eq!(
            mapping.resolve("region").unwrap(),
            FieldAccessor::json(["properties", "region"])
        );
        assert_eq!(
            mapping.resolve("properties.region").unwrap(),
            FieldAccessor::json(["properties", "region"])
        );
    }

    #[test]
    fn test_unknown_property_without_bucket_is_rejected() {
        let mapping = transfer_mapping().with_extension_bucket(None);
        let err = mapping.resolve("region").unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert!(err.to_string().contains("region"));
    }

    #[test]
    fn test_invalid_path_segments_are_rejected() {
        let mapping = FieldMapping::base();
        assert!(mapping.resolve("").is_err());
        assert!(mapping.resolve("a..b").is_err());
        assert!(mapping.resolve("name'; DROP TABLE x").is_err());
        assert!(mapping.resolve("1abc").is_err());
    }

    #[test]
    fn test_column_metadata() {
        assert_eq!(EntityColumn::StateCount.column_name(), "state_count");
        assert_eq!(EntityColumn::Id.column_type(), ColumnType::Text);
        assert_eq!(EntityColumn::UpdatedAt.column_type(), ColumnType::Integer);
    }
}
