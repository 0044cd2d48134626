// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQL rendering of a [`TranslatedQuery`].
//!
//! Statements are assembled as text with numbered placeholders plus a list of
//! [`SqlValue`] binds, which the relational stores attach in order. Path
//! segments were restricted to identifier characters during resolution, so
//! inlining them is safe.
//!
//! JSON values keep their JSON type in every comparison: PostgreSQL compares
//! `payload #> '{a,b}'` against a `jsonb` literal, SQLite guards
//! `json_extract` with `json_type`. A string `"3"` never equals the number
//! `3` and `true` never equals `1`, matching in-memory evaluation. Text sort
//! keys use byte order (`COLLATE "C"` on PostgreSQL).

use super::mapping::{ColumnType, EntityColumn, FieldAccessor};
use super::spec::SortOrder;
use super::translator::{Condition, Literal, Predicate, SortKey};

/// SQL flavour to render for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    /// PostgreSQL: `$n` placeholders, JSONB operators.
    Postgres,
    /// SQLite: `?n` placeholders, JSON1 functions.
    Sqlite,
}

/// A bind parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// Text parameter.
    Text(String),
    /// Integer parameter.
    Integer(i64),
    /// Floating point parameter.
    Float(f64),
}

/// Incrementally built statement text and its binds.
#[derive(Debug, Clone)]
pub struct SqlBuilder {
    dialect: SqlDialect,
    sql: String,
    binds: Vec<SqlValue>,
}

impl SqlBuilder {
    /// Start an empty statement.
    pub fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            binds: Vec::new(),
        }
    }

    /// Append raw SQL.
    pub fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    /// Append a placeholder for `value`.
    pub fn push_bind(&mut self, value: SqlValue) -> &mut Self {
        self.binds.push(value);
        let index = self.binds.len();
        match self.dialect {
            SqlDialect::Postgres => self.sql.push_str(&format!("${}", index)),
            SqlDialect::Sqlite => self.sql.push_str(&format!("?{}", index)),
        }
        self
    }

    /// Append ` AND <predicate>` for every predicate, reading columns of
    /// table alias `alias`.
    pub fn push_predicates(&mut self, predicates: &[Predicate], alias: &str) -> &mut Self {
        for predicate in predicates {
            self.push(" AND ");
            match &predicate.accessor {
                FieldAccessor::Column(column) => {
                    self.push_column_predicate(*column, &predicate.condition, alias)
                }
                FieldAccessor::Json(path) => match self.dialect {
                    SqlDialect::Postgres => {
                        self.push_postgres_json_predicate(path, &predicate.condition, alias)
                    }
                    SqlDialect::Sqlite => {
                        self.push_sqlite_json_predicate(path, &predicate.condition, alias)
                    }
                },
            }
        }
        self
    }

    fn push_column_predicate(&mut self, column: EntityColumn, condition: &Condition, alias: &str) {
        let expr = format!("{}.{}", alias, column.column_name());
        match condition {
            Condition::Equals(literal) => {
                self.push(&expr).push(" = ");
                self.push_bind(column_bind(literal));
            }
            Condition::In(literals) if literals.is_empty() => {
                self.push("1 = 0");
            }
            Condition::In(literals) => {
                self.push(&expr).push(" IN (");
                for (i, literal) in literals.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.push_bind(column_bind(literal));
                }
                self.push(")");
            }
            Condition::Like(pattern) => {
                let text = format!("CAST({} AS TEXT)", expr);
                self.push_like(&text, pattern);
            }
        }
    }

    fn push_postgres_json_predicate(
        &mut self,
        path: &[String],
        condition: &Condition,
        alias: &str,
    ) {
        let json = postgres_json(alias, path);
        match condition {
            Condition::Equals(literal) => {
                self.push(&json).push(" = ");
                self.push_bind(SqlValue::Text(literal.to_json()));
                self.push("::jsonb");
            }
            Condition::In(literals) if literals.is_empty() => {
                self.push("1 = 0");
            }
            Condition::In(literals) => {
                self.push(&json).push(" IN (");
                for (i, literal) in literals.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.push_bind(SqlValue::Text(literal.to_json()));
                    self.push("::jsonb");
                }
                self.push(")");
            }
            Condition::Like(pattern) => {
                let text = format!(
                    "CASE WHEN jsonb_typeof({}) IN ('string', 'number', 'boolean') THEN {} END",
                    json,
                    postgres_json_text(alias, path)
                );
                self.push_like(&text, pattern);
            }
        }
    }

    fn push_sqlite_json_predicate(&mut self, path: &[String], condition: &Condition, alias: &str) {
        match condition {
            Condition::Equals(literal) => self.push_sqlite_json_equals(path, literal, alias),
            Condition::In(literals) if literals.is_empty() => {
                self.push("1 = 0");
            }
            Condition::In(literals) => {
                self.push("(");
                for (i, literal) in literals.iter().enumerate() {
                    if i > 0 {
                        self.push(" OR ");
                    }
                    self.push_sqlite_json_equals(path, literal, alias);
                }
                self.push(")");
            }
            Condition::Like(pattern) => {
                let value = sqlite_json(alias, path);
                let text = format!(
                    "CASE {} WHEN 'true' THEN 'true' WHEN 'false' THEN 'false' \
                     WHEN 'text' THEN {} WHEN 'integer' THEN CAST({} AS TEXT) \
                     WHEN 'real' THEN CAST({} AS TEXT) END",
                    sqlite_json_type(alias, path),
                    value,
                    value,
                    value
                );
                self.push_like(&text, pattern);
            }
        }
    }

    /// `json_extract` maps JSON `true` to `1`, so the JSON type is checked
    /// first and booleans are matched on the type alone.
    fn push_sqlite_json_equals(&mut self, path: &[String], literal: &Literal, alias: &str) {
        let json_type = sqlite_json_type(alias, path);
        let value = sqlite_json(alias, path);
        match literal {
            Literal::Bool(b) => {
                self.push(&json_type).push(" = ");
                self.push_bind(SqlValue::Text(b.to_string()));
            }
            Literal::Text(s) => {
                self.push(&format!("({} = 'text' AND {} = ", json_type, value));
                self.push_bind(SqlValue::Text(s.clone()));
                self.push(")");
            }
            Literal::Integer(_) | Literal::Float(_) => {
                self.push(&format!("({} IN ('integer', 'real') AND {} = ", json_type, value));
                self.push_bind(column_bind(literal));
                self.push(")");
            }
        }
    }

    fn push_like(&mut self, text: &str, pattern: &str) {
        match self.dialect {
            SqlDialect::Postgres => {
                self.push(text).push(" LIKE ");
                self.push_bind(SqlValue::Text(escape_like(pattern)));
                self.push(" ESCAPE '\\'");
            }
            SqlDialect::Sqlite => {
                self.push(text).push(" GLOB ");
                self.push_bind(SqlValue::Text(like_to_glob(pattern)));
            }
        }
    }

    /// Append ` ORDER BY <key>, <alias>.id ASC`.
    ///
    /// A JSON key sorts by type first (null, boolean, number, string,
    /// composite) and then by value within the type.
    pub fn push_order_by(&mut self, sort: Option<&SortKey>, alias: &str) -> &mut Self {
        self.push(" ORDER BY ");
        if let Some(key) = sort {
            let direction = match key.order {
                SortOrder::Asc => " ASC NULLS FIRST, ",
                SortOrder::Desc => " DESC NULLS LAST, ",
            };
            for expr in sort_exprs(self.dialect, &key.accessor, alias) {
                self.push(&expr).push(direction);
            }
        }
        let id = id_order(self.dialect, alias);
        self.push(&id).push(" ASC")
    }

    /// Append ` LIMIT <limit> OFFSET <offset>`.
    pub fn push_paging(&mut self, offset: u32, limit: u32) -> &mut Self {
        self.push(" LIMIT ");
        self.push_bind(SqlValue::Integer(i64::from(limit)));
        self.push(" OFFSET ");
        self.push_bind(SqlValue::Integer(i64::from(offset)));
        self
    }

    /// Statement text rendered so far.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Consume the builder.
    pub fn build(self) -> (String, Vec<SqlValue>) {
        (self.sql, self.binds)
    }
}

/// The `id` tiebreak in byte order.
fn id_order(dialect: SqlDialect, alias: &str) -> String {
    match dialect {
        SqlDialect::Postgres => format!("{}.id COLLATE \"C\"", alias),
        SqlDialect::Sqlite => format!("{}.id", alias),
    }
}

fn column_bind(literal: &Literal) -> SqlValue {
    match literal {
        Literal::Text(s) => SqlValue::Text(s.clone()),
        Literal::Integer(i) => SqlValue::Integer(*i),
        Literal::Float(f) => SqlValue::Float(*f),
        Literal::Bool(b) => SqlValue::Integer(i64::from(*b)),
    }
}

fn postgres_json(alias: &str, path: &[String]) -> String {
    format!("{}.payload #> '{{{}}}'", alias, path.join(","))
}

fn postgres_json_text(alias: &str, path: &[String]) -> String {
    format!("{}.payload #>> '{{{}}}'", alias, path.join(","))
}

fn sqlite_json(alias: &str, path: &[String]) -> String {
    format!("json_extract({}.payload, '{}')", alias, sqlite_json_path(path))
}

fn sqlite_json_type(alias: &str, path: &[String]) -> String {
    format!("json_type({}.payload, '{}')", alias, sqlite_json_path(path))
}

fn sort_exprs(dialect: SqlDialect, accessor: &FieldAccessor, alias: &str) -> Vec<String> {
    match (accessor, dialect) {
        (FieldAccessor::Column(column), SqlDialect::Postgres)
            if column.column_type() == ColumnType::Text =>
        {
            vec![format!("{}.{} COLLATE \"C\"", alias, column.column_name())]
        }
        (FieldAccessor::Column(column), _) => vec![format!("{}.{}", alias, column.column_name())],
        (FieldAccessor::Json(path), SqlDialect::Postgres) => {
            let kind = format!("jsonb_typeof({})", postgres_json(alias, path));
            let text = postgres_json_text(alias, path);
            vec![
                format!(
                    "CASE {} WHEN 'boolean' THEN 1 WHEN 'number' THEN 2 WHEN 'string' THEN 3 \
                     WHEN 'array' THEN 4 WHEN 'object' THEN 4 ELSE 0 END",
                    kind
                ),
                format!("CASE WHEN {} = 'boolean' THEN {} END", kind, text),
                format!("CASE WHEN {} = 'number' THEN ({})::numeric END", kind, text),
                format!("CASE WHEN {} = 'string' THEN {} END COLLATE \"C\"", kind, text),
            ]
        }
        (FieldAccessor::Json(path), SqlDialect::Sqlite) => {
            let kind = sqlite_json_type(alias, path);
            let value = sqlite_json(alias, path);
            vec![
                format!(
                    "CASE {} WHEN 'true' THEN 1 WHEN 'false' THEN 1 WHEN 'integer' THEN 2 \
                     WHEN 'real' THEN 2 WHEN 'text' THEN 3 WHEN 'array' THEN 4 \
                     WHEN 'object' THEN 4 ELSE 0 END",
                    kind
                ),
                format!("CASE {} WHEN 'true' THEN 1 WHEN 'false' THEN 0 END", kind),
                format!("CASE WHEN {} IN ('integer', 'real') THEN {} END", kind, value),
                format!("CASE WHEN {} = 'text' THEN {} END", kind, value),
            ]
        }
    }
}

fn sqlite_json_path(path: &[String]) -> String {
    let mut out = String::from("$");
    for segment in path {
        out.push_str(&format!(".\"{}\"", segment));
    }
    out
}

/// Escape LIKE metacharacters other than `%`, using `\` as the escape.
fn escape_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '_' => out.push_str("\\_"),
            other => out.push(other),
        }
    }
    out
}

/// Translate a `%` pattern to a case-sensitive GLOB pattern.
fn like_to_glob(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        match c {
            '%' => out.push('*'),
            '*' => out.push_str("[*]"),
            '?' => out.push_str("[?]"),
            '[' => out.push_str("[[]"),
            other => out.push(other),
        }
    }
    out
}
