// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Payload encoding for stored entities.
//!
//! Rows carry the entity kind and schema version next to the JSON body, so
//! decoding can refuse a foreign kind and migrate older layouts through
//! [`StatefulEntity::upgrade`].

use serde_json::Value;

use crate::entity::StatefulEntity;
use crate::error::{Result, StoreError};

/// An entity serialized for storage.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedEntity {
    /// Resource kind tag.
    pub kind: &'static str,
    /// Layout version of `payload`.
    pub schema_version: i32,
    /// JSON body.
    pub payload: Value,
}

/// Serialize `entity` with its kind and schema version.
pub fn encode<T: StatefulEntity>(entity: &T) -> Result<EncodedEntity> {
    let payload = serde_json::to_value(entity).map_err(|e| StoreError::Codec {
        kind: T::KIND.to_string(),
        message: format!("serialize failed: {}", e),
    })?;

    Ok(EncodedEntity {
        kind: T::KIND,
        schema_version: T::SCHEMA_VERSION,
        payload,
    })
}

/// Rebuild a `T` from a stored row.
pub fn decode<T: StatefulEntity>(kind: &str, schema_version: i32, payload: Value) -> Result<T> {
    if kind != T::KIND {
        return Err(codec_error::<T>(format!(
            "payload belongs to kind '{}'",
            kind
        )));
    }

    let body = match schema_version.cmp(&T::SCHEMA_VERSION) {
        std::cmp::Ordering::Equal => payload,
        std::cmp::Ordering::Less => T::upgrade(schema_version, payload).map_err(codec_error::<T>)?,
        std::cmp::Ordering::Greater => {
            return Err(codec_error::<T>(format!(
                "schema version {} is newer than supported version {}",
                schema_version,
                T::SCHEMA_VERSION
            )));
        }
    };

    serde_json::from_value(body).map_err(|e| codec_error::<T>(format!("deserialize failed: {}", e)))
}

/// Decode a payload stored as JSON text.
pub fn decode_text<T: StatefulEntity>(kind: &str, schema_version: i32, payload: &str) -> Result<T> {
    let value = serde_json::from_str(payload)
        .map_err(|e| codec_error::<T>(format!("payload is not valid JSON: {}", e)))?;
    decode(kind, schema_version, value)
}

fn codec_error<T: StatefulEntity>(message: String) -> StoreError {
    StoreError::Codec {
        kind: T::KIND.to_string(),
        message,
    }
}
