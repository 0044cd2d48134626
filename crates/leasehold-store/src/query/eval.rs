// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory execution of a [`TranslatedQuery`].
//!
//! Column accessors read [`EntityMeta`]; JSON accessors walk the entity's
//! serialized payload. Ordering rules mirror the SQL rendering: nulls sort
//! first ascending, and `id` breaks ties.

use std::borrow::Cow;
use std::cmp::Ordering;

use serde_json::Value;

use crate::entity::EntityMeta;

use super::mapping::{EntityColumn, FieldAccessor};
use super::spec::SortOrder;
use super::translator::{Condition, Literal, Predicate, TranslatedQuery};

/// Read-only view of one stored entity.
#[derive(Debug, Clone, Copy)]
pub struct EntityView<'a> {
    /// State bookkeeping fields.
    pub meta: &'a EntityMeta,
    /// Serialized entity.
    pub payload: &'a Value,
}

/// A value read through a [`FieldAccessor`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue<'a> {
    /// Missing or JSON null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Integer(i64),
    /// Floating point.
    Float(f64),
    /// Text.
    Text(Cow<'a, str>),
    /// Object or array; never equal to a literal.
    Composite,
}

impl<'a> EntityView<'a> {
    /// Read the value behind `accessor`.
    pub fn field(&self, accessor: &FieldAccessor) -> FieldValue<'a> {
        match accessor {
            FieldAccessor::Column(column) => column_value(self.meta, *column),
            FieldAccessor::Json(path) => {
                let mut current = self.payload;
                for segment in path {
                    match current.get(segment) {
                        Some(next) => current = next,
                        None => return FieldValue::Null,
                    }
                }
                json_value(current)
            }
        }
    }
}

fn column_value(meta: &EntityMeta, column: EntityColumn) -> FieldValue<'_> {
    match column {
        EntityColumn::Id => FieldValue::Text(Cow::Borrowed(meta.id.as_str())),
        EntityColumn::State => FieldValue::Integer(i64::from(meta.state)),
        EntityColumn::StateTimestamp => FieldValue::Integer(meta.state_timestamp),
        EntityColumn::StateCount => FieldValue::Integer(i64::from(meta.state_count)),
        EntityColumn::ErrorDetail => match &meta.error_detail {
            Some(detail) => FieldValue::Text(Cow::Borrowed(detail.as_str())),
            None => FieldValue::Null,
        },
        EntityColumn::CreatedAt => FieldValue::Integer(meta.created_at),
        EntityColumn::UpdatedAt => FieldValue::Integer(meta.updated_at),
    }
}

fn json_value(value: &Value) -> FieldValue<'_> {
    match value {
        Value::Null => FieldValue::Null,
        Value::Bool(b) => FieldValue::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => FieldValue::Integer(i),
            None => n.as_f64().map(FieldValue::Float).unwrap_or(FieldValue::Null),
        },
        Value::String(s) => FieldValue::Text(Cow::Borrowed(s.as_str())),
        Value::Array(_) | Value::Object(_) => FieldValue::Composite,
    }
}

impl FieldValue<'_> {
    fn equals(&self, literal: &Literal) -> bool {
        match (self, literal) {
            (FieldValue::Text(a), Literal::Text(b)) => a.as_ref() == b.as_str(),
            (FieldValue::Bool(a), Literal::Bool(b)) => a == b,
            (FieldValue::Integer(a), Literal::Integer(b)) => a == b,
            (FieldValue::Integer(a), Literal::Float(b)) => (*a as f64) == *b,
            (FieldValue::Float(a), Literal::Integer(b)) => *a == (*b as f64),
            (FieldValue::Float(a), Literal::Float(b)) => a == b,
            _ => false,
        }
    }

    fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            FieldValue::Text(s) => Some(Cow::Borrowed(s.as_ref())),
            FieldValue::Integer(i) => Some(Cow::Owned(i.to_string())),
            FieldValue::Float(f) => Some(Cow::Owned(Value::from(*f).to_string())),
            FieldValue::Bool(b) => Some(Cow::Owned(b.to_string())),
            FieldValue::Null | FieldValue::Composite => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            FieldValue::Null => 0,
            FieldValue::Bool(_) => 1,
            FieldValue::Integer(_) | FieldValue::Float(_) => 2,
            FieldValue::Text(_) => 3,
            FieldValue::Composite => 4,
        }
    }

    fn compare(&self, other: &FieldValue<'_>) -> Ordering {
        match (self, other) {
            (FieldValue::Bool(a), FieldValue::Bool(b)) => a.cmp(b),
            (FieldValue::Integer(a), FieldValue::Integer(b)) => a.cmp(b),
            (FieldValue::Text(a), FieldValue::Text(b)) => a.cmp(b),
            (a, b) if a.rank() == 2 && b.rank() == 2 => {
                let (x, y) = (a.as_f64(), b.as_f64());
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }

    fn as_f64(&self) -> f64 {
        match self {
            FieldValue::Integer(i) => *i as f64,
            FieldValue::Float(f) => *f,
            _ => 0.0,
        }
    }
}

/// `%`-wildcard match. Every other character, `_` included, is literal.
pub fn like_matches(pattern: &str, text: &str) -> bool {
    let parts = pattern.split('%').collect::<Vec<_>>();
    if parts.len() == 1 {
        return pattern == text;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !text.starts_with(first) {
        return false;
    }
    let mut rest = &text[first.len()..];
    if rest.len() < last.len() || !rest.ends_with(last) {
        return false;
    }
    rest = &rest[..rest.len() - last.len()];

    for middle in &parts[1..parts.len() - 1] {
        if middle.is_empty() {
            continue;
        }
        match rest.find(middle) {
            Some(pos) => rest = &rest[pos + middle.len()..],
            None => return false,
        }
    }
    true
}

/// Whether the entity satisfies one predicate.
pub fn matches(predicate: &Predicate, view: &EntityView<'_>) -> bool {
    let value = view.field(&predicate.accessor);
    match &predicate.condition {
        Condition::Equals(literal) => value.equals(literal),
        Condition::In(literals) => literals.iter().any(|l| value.equals(l)),
        Condition::Like(pattern) => value
            .as_text()
            .map(|text| like_matches(pattern, &text))
            .unwrap_or(false),
    }
}

/// Whether the entity satisfies every predicate.
pub fn matches_all(predicates: &[Predicate], view: &EntityView<'_>) -> bool {
    predicates.iter().all(|p| matches(p, view))
}

/// Filter, sort and page `items`.
pub fn execute<'a, E>(
    query: &TranslatedQuery,
    items: impl IntoIterator<Item = &'a E>,
    view: impl Fn(&'a E) -> EntityView<'a>,
) -> Vec<&'a E> {
    let mut selected = items
        .into_iter()
        .filter(|item| matches_all(&query.predicates, &view(*item)))
        .collect::<Vec<_>>();

    selected.sort_by(|a, b| {
        let (va, vb) = (view(*a), view(*b));
        let primary = match &query.sort {
            Some(key) => {
                let ordering = va.field(&key.accessor).compare(&vb.field(&key.accessor));
                match key.order {
                    SortOrder::Asc => ordering,
                    SortOrder::Desc => ordering.reverse(),
                }
            }
            None => Ordering::Equal,
        };
        primary.then_with(|| va.meta.id.cmp(&vb.meta.id))
    });

    selected
        .into_iter()
        .skip(query.offset as usize)
        .take(query.limit as usize)
        .collect()
}

/// Number of items matching every predicate, ignoring paging.
pub fn count<'a, E: 'a>(
    predicates: &[Predicate],
    items: impl IntoIterator<Item = &'a E>,
    view: impl Fn(&'a E) -> EntityView<'a>,
) -> usize {
    items
        .into_iter()
        .filter(|item| matches_all(predicates, &view(*item)))
        .count()
}
