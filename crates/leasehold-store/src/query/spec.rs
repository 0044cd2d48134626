// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Storage-agnostic filter, sort and paging descriptors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

/// Default page size when a query does not set one.
pub const DEFAULT_LIMIT: u32 = 50;

/// Comparison operator of a [`Criterion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum Operator {
    /// Exact match.
    Eq,
    /// Membership in a list of literals.
    In,
    /// Pattern match with `%` as the wildcard.
    Like,
}

impl Operator {
    /// Textual form used in serialized criteria.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::In => "in",
            Self::Like => "like",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "=" => Ok(Self::Eq),
            "in" => Ok(Self::In),
            "like" => Ok(Self::Like),
            other => Err(StoreError::validation(
                "operator",
                format!("unsupported operator '{}'", other),
            )),
        }
    }
}

impl TryFrom<String> for Operator {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Operator> for &'static str {
    fn from(op: Operator) -> Self {
        op.as_str()
    }
}

/// A single filter condition: `operand_left operator operand_right`.
///
/// The right operand is kept as raw JSON so that malformed combinations
/// (a list with `=`, an object anywhere) reach the translator and are
/// rejected there with a descriptive error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Criterion {
    /// Dot-separated property path.
    pub operand_left: String,
    /// Comparison operator.
    pub operator: Operator,
    /// Literal or list of literals.
    pub operand_right: Value,
}

impl Criterion {
    /// Create a criterion.
    pub fn new(
        operand_left: impl Into<String>,
        operator: Operator,
        operand_right: impl Into<Value>,
    ) -> Self {
        Self {
            operand_left: operand_left.into(),
            operator,
            operand_right: operand_right.into(),
        }
    }

    /// Create a criterion from the textual operator form (`"="`, `"in"`, `"like"`).
    pub fn parse(
        operand_left: impl Into<String>,
        operator: &str,
        operand_right: impl Into<Value>,
    ) -> Result<Self, StoreError> {
        Ok(Self::new(operand_left, operator.parse()?, operand_right))
    }

    /// `operand_left = value`
    pub fn equal(operand_left: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(operand_left, Operator::Eq, value)
    }

    /// `operand_left in (values...)`
    pub fn is_in<V: Into<Value>>(
        operand_left: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let list = values.into_iter().map(Into::into).collect::<Vec<Value>>();
        Self::new(operand_left, Operator::In, Value::Array(list))
    }

    /// `operand_left like pattern`
    pub fn like(operand_left: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(operand_left, Operator::Like, Value::String(pattern.into()))
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.operand_left, self.operator, self.operand_right
        )
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    /// Smallest first (default).
    #[default]
    Asc,
    /// Largest first.
    Desc,
}

/// Filter, sort and page description evaluated by every store backend.
///
/// An empty criteria list matches everything. Offset and limit apply after
/// filtering and sorting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuerySpec {
    /// Conditions that must all hold.
    pub criteria: Vec<Criterion>,
    /// Property path to sort on.
    pub sort_field: Option<String>,
    /// Direction for `sort_field`.
    pub sort_order: SortOrder,
    /// Number of matches to skip.
    pub offset: u32,
    /// Maximum number of matches to return. Must be positive.
    pub limit: u32,
}

impl Default for QuerySpec {
    fn default() -> Self {
        Self {
            criteria: Vec::new(),
            sort_field: None,
            sort_order: SortOrder::Asc,
            offset: 0,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl QuerySpec {
    /// Query matching everything, first page.
    pub fn new() -> Self {
        Self::default()
    }

    /// Query with the given criteria.
    pub fn with_criteria(criteria: impl IntoIterator<Item = Criterion>) -> Self {
        Self {
            criteria: criteria.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Add one more criterion.
    pub fn filter(mut self, criterion: Criterion) -> Self {
        self.criteria.push(criterion);
        self
    }

    /// Sort on `field` in `order`.
    pub fn sorted_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort_field = Some(field.into());
        self.sort_order = order;
        self
    }

    /// Skip the first `offset` matches.
    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    /// Return at most `limit` matches.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }
}
