// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Validation and resolution of a [`QuerySpec`] against a [`FieldMapping`].
//!
//! The result is a backend-neutral [`TranslatedQuery`]; [`super::eval`]
//! executes it in memory and [`super::sql`] renders it as SQL.

use serde_json::Value;

use crate::error::{Result, StoreError};

use super::mapping::{ColumnType, FieldAccessor, FieldMapping};
use super::spec::{Criterion, Operator, QuerySpec, SortOrder};

/// Scalar right-hand operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// String literal.
    Text(String),
    /// Integer literal.
    Integer(i64),
    /// Floating point literal.
    Float(f64),
    /// Boolean literal.
    Bool(bool),
}

impl Literal {
    /// JSON text of the literal, for comparisons against stored JSON values.
    pub fn to_json(&self) -> String {
        let value = match self {
            Self::Text(s) => Value::String(s.clone()),
            Self::Integer(i) => Value::from(*i),
            Self::Float(f) => Value::from(*f),
            Self::Bool(b) => Value::Bool(*b),
        };
        value.to_string()
    }
}

/// What a predicate checks.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Exact match.
    Equals(Literal),
    /// Membership; an empty list matches nothing.
    In(Vec<Literal>),
    /// `%`-wildcard pattern match.
    Like(String),
}

/// One resolved and validated criterion.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// Property path as written by the caller.
    pub property: String,
    /// Where the value lives.
    pub accessor: FieldAccessor,
    /// The check to apply.
    pub condition: Condition,
}

/// Resolved sort key.
#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    /// Where the sort value lives.
    pub accessor: FieldAccessor,
    /// Direction.
    pub order: SortOrder,
}

/// A validated query ready for a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedQuery {
    /// Conjunction of predicates; empty matches everything.
    pub predicates: Vec<Predicate>,
    /// Sort key; `id` is always the tie-breaker.
    pub sort: Option<SortKey>,
    /// Matches to skip.
    pub offset: u32,
    /// Maximum matches to return.
    pub limit: u32,
}

/// Translate `spec` for an entity kind described by `mapping`.
pub fn translate(spec: &QuerySpec, mapping: &FieldMapping) -> Result<TranslatedQuery> {
    if spec.limit == 0 {
        return Err(StoreError::validation("limit", "limit must be positive"));
    }

    let predicates = translate_criteria(&spec.criteria, mapping)?;

    let sort = match &spec.sort_field {
        Some(field) => {
            let accessor = mapping.resolve(field).map_err(|_| {
                StoreError::validation(field, "unsupported sort field")
            })?;
            Some(SortKey {
                accessor,
                order: spec.sort_order,
            })
        }
        None => None,
    };

    Ok(TranslatedQuery {
        predicates,
        sort,
        offset: spec.offset,
        limit: spec.limit,
    })
}

/// Translate a bare list of criteria (no sort, no paging).
pub fn translate_criteria(
    criteria: &[Criterion],
    mapping: &FieldMapping,
) -> Result<Vec<Predicate>> {
    criteria
        .iter()
        .map(|criterion| translate_criterion(criterion, mapping))
        .collect()
}

fn translate_criterion(criterion: &Criterion, mapping: &FieldMapping) -> Result<Predicate> {
    let property = criterion.operand_left.as_str();
    let accessor = mapping.resolve(property)?;
    let column_type = match &accessor {
        FieldAccessor::Column(column) => Some(column.column_type()),
        FieldAccessor::Json(_) => None,
    };

    let condition = match (criterion.operator, &criterion.operand_right) {
        (Operator::In, Value::Array(items)) => {
            let literals = items
                .iter()
                .map(|item| scalar_literal(property, item, column_type))
                .collect::<Result<Vec<_>>>()?;
            Condition::In(literals)
        }
        (Operator::In, other) => {
            return Err(StoreError::validation(
                property,
                format!("operator 'in' requires a list operand, got {}", json_kind(other)),
            ));
        }
        (op, Value::Array(_)) => {
            return Err(StoreError::validation(
                property,
                format!("operator '{}' does not accept a list operand", op),
            ));
        }
        (Operator::Eq, value) => Condition::Equals(scalar_literal(property, value, column_type)?),
        (Operator::Like, Value::String(pattern)) => Condition::Like(pattern.clone()),
        (Operator::Like, other) => {
            return Err(StoreError::validation(
                property,
                format!("operator 'like' requires a string operand, got {}", json_kind(other)),
            ));
        }
    };

    Ok(Predicate {
        property: property.to_string(),
        accessor,
        condition,
    })
}

fn scalar_literal(
    property: &str,
    value: &Value,
    column_type: Option<ColumnType>,
) -> Result<Literal> {
    let literal = match value {
        Value::String(s) => Literal::Text(s.clone()),
        Value::Bool(b) => Literal::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Literal::Integer(i),
            None => Literal::Float(n.as_f64().ok_or_else(|| {
                StoreError::validation(property, format!("unsupported number {}", n))
            })?),
        },
        other => {
            return Err(StoreError::validation(
                property,
                format!("expected a scalar operand, got {}", json_kind(other)),
            ));
        }
    };

    match (column_type, &literal) {
        (Some(ColumnType::Integer), Literal::Integer(_))
        | (Some(ColumnType::Text), Literal::Text(_))
        | (None, _) => Ok(literal),
        (Some(ColumnType::Integer), _) => Err(StoreError::validation(
            property,
            format!("integer column cannot be compared with {}", json_kind(value)),
        )),
        (Some(ColumnType::Text), _) => Err(StoreError::validation(
            property,
            format!("text column cannot be compared with {}", json_kind(value)),
        )),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
