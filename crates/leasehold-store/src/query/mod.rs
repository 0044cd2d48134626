// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Storage-agnostic querying.
//!
//! A [`QuerySpec`] is translated once against the entity kind's
//! [`FieldMapping`] into a [`TranslatedQuery`]. The in-memory store evaluates
//! that with [`eval`]; the relational stores render it with [`sql`].

pub mod eval;
pub mod mapping;
pub mod spec;
pub mod sql;
pub mod translator;

pub use eval::{EntityView, like_matches};
pub use mapping::{
    ColumnType, DEFAULT_EXTENSION_BUCKET, EntityColumn, FieldAccessor, FieldMapping,
};
pub use spec::{Criterion, DEFAULT_LIMIT, Operator, QuerySpec, SortOrder};
pub use sql::{SqlBuilder, SqlDialect, SqlValue};
pub use translator::{
    Condition, Literal, Predicate, SortKey, TranslatedQuery, translate, translate_criteria,
};
