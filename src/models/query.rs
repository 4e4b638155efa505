//! Query-related data models.
//!
//! This module defines the values exchanged with the backend and a small typed
//! SELECT builder. A [`Select`] doubles as the "selectable" a view is defined over,
//! so it compiles two ways: with bind placeholders for execution, or with every
//! parameter inlined as a literal for DDL.

use crate::db::Dialect;
use crate::error::{DbError, DbResult};
use crate::models::schema::{ColumnType, Table};
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// A value bound to, or inlined into, a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    /// Stored as i64 for maximum range
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Bytes(Vec<u8>),
}

impl SqlValue {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Convert a JSON value, e.g. a column of a fetched row.
    ///
    /// Arrays and objects are stored as their JSON text.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(v) => Self::Bool(*v),
            JsonValue::Number(n) => match n.as_i64() {
                Some(v) => Self::Int(v),
                None => n.as_f64().map(Self::Float).unwrap_or(Self::Null),
            },
            JsonValue::String(s) => Self::Text(s.clone()),
            other => Self::Text(other.to_string()),
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// SQL text with the parameters its placeholders refer to, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl CompiledQuery {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// How parameters are emitted while compiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindMode {
    Placeholders,
    Literals,
}

/// Expression producing one output column of a [`Select`].
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnExpr {
    /// A column of the source table.
    Column(String),
    /// A constant, always rendered inline.
    Literal(SqlValue),
}

/// One output column: its name, type and primary-key flag.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectColumn {
    pub name: String,
    pub expr: ColumnExpr,
    pub column_type: ColumnType,
    pub primary_key: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl Comparison {
    fn operator(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: String,
    pub comparison: Comparison,
    pub value: SqlValue,
}

/// A SELECT over a single table.
#[derive(Debug, Clone)]
pub struct Select {
    source: Arc<Table>,
    columns: Vec<SelectColumn>,
    predicates: Vec<Predicate>,
    order_by: Vec<(String, bool)>,
    limit: Option<u64>,
}

impl Select {
    /// Select every column of `table`.
    pub fn from_table(table: &Arc<Table>) -> Self {
        let columns = table
            .columns()
            .iter()
            .map(|c| SelectColumn {
                name: c.name.clone(),
                expr: ColumnExpr::Column(c.name.clone()),
                column_type: c.column_type.clone(),
                primary_key: c.primary_key,
            })
            .collect();
        Self {
            source: Arc::clone(table),
            columns,
            predicates: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    /// Select the named columns of `table`, in the given order.
    pub fn columns(table: &Arc<Table>, names: &[&str]) -> DbResult<Self> {
        let mut select = Self {
            source: Arc::clone(table),
            columns: Vec::with_capacity(names.len()),
            predicates: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        };
        for name in names {
            select = select.with_column_as(name, name)?;
        }
        Ok(select)
    }

    /// Add a source column under an output alias.
    pub fn with_column_as(mut self, column: &str, alias: &str) -> DbResult<Self> {
        let source = self.source.require_column(column)?;
        self.columns.push(SelectColumn {
            name: alias.to_string(),
            expr: ColumnExpr::Column(source.name.clone()),
            column_type: source.column_type.clone(),
            primary_key: source.primary_key,
        });
        Ok(self)
    }

    /// Add a constant output column.
    pub fn with_literal(
        mut self,
        name: &str,
        value: impl Into<SqlValue>,
        column_type: ColumnType,
    ) -> Self {
        self.columns.push(SelectColumn {
            name: name.to_string(),
            expr: ColumnExpr::Literal(value.into()),
            column_type,
            primary_key: false,
        });
        self
    }

    /// Restrict rows by comparing a source column with a value.
    ///
    /// Fails with an attribute error if the source table has no such column.
    pub fn filter(
        mut self,
        column: &str,
        comparison: Comparison,
        value: impl Into<SqlValue>,
    ) -> DbResult<Self> {
        let source = self.source.require_column(column)?;
        self.predicates.push(Predicate {
            column: source.name.clone(),
            comparison,
            value: value.into(),
        });
        Ok(self)
    }

    pub fn filter_eq(self, column: &str, value: impl Into<SqlValue>) -> DbResult<Self> {
        self.filter(column, Comparison::Eq, value)
    }

    pub fn order_by(mut self, column: &str, descending: bool) -> DbResult<Self> {
        let source = self.source.require_column(column)?;
        self.order_by.push((source.name.clone(), descending));
        Ok(self)
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn source(&self) -> &Arc<Table> {
        &self.source
    }

    pub fn output_columns(&self) -> &[SelectColumn] {
        &self.columns
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Compile with bind placeholders.
    pub fn compile(&self, dialect: Dialect) -> CompiledQuery {
        let mut params = Vec::new();
        let sql = self.render(dialect, BindMode::Placeholders, &mut params);
        CompiledQuery { sql, params }
    }

    /// Compile with every parameter rendered as an inline literal.
    pub fn compile_inline(&self, dialect: Dialect) -> String {
        let mut params = Vec::new();
        self.render(dialect, BindMode::Literals, &mut params)
    }

    /// Compile a query counting the rows this select returns.
    pub fn compile_count(&self, dialect: Dialect) -> CompiledQuery {
        let inner = self.compile(dialect);
        CompiledQuery {
            sql: format!("SELECT COUNT(*) FROM ({}) subquery", inner.sql),
            params: inner.params,
        }
    }

    fn render(&self, dialect: Dialect, mode: BindMode, params: &mut Vec<SqlValue>) -> String {
        let table = self.source.name();
        let mut sql = String::from("SELECT ");

        if let (Some(limit), Dialect::MsSql) = (self.limit, dialect) {
            sql.push_str(&format!("TOP {} ", limit));
        }

        let projection: Vec<String> = self
            .columns
            .iter()
            .map(|c| match &c.expr {
                ColumnExpr::Column(name) if *name == c.name => format!("{}.{}", table, name),
                ColumnExpr::Column(name) => format!("{}.{} AS {}", table, name, c.name),
                ColumnExpr::Literal(value) => {
                    format!("{} AS {}", dialect.render_literal(value), c.name)
                }
            })
            .collect();
        sql.push_str(&projection.join(", "));
        sql.push_str(" FROM ");
        sql.push_str(table);

        if !self.predicates.is_empty() {
            let conditions: Vec<String> = self
                .predicates
                .iter()
                .map(|p| {
                    let column = format!("{}.{}", table, p.column);
                    match (&p.value, p.comparison) {
                        (SqlValue::Null, Comparison::Eq) => format!("{} IS NULL", column),
                        (SqlValue::Null, Comparison::NotEq) => format!("{} IS NOT NULL", column),
                        (value, comparison) => {
                            let rendered = match mode {
                                BindMode::Literals => dialect.render_literal(value),
                                BindMode::Placeholders => {
                                    params.push(value.clone());
                                    dialect.placeholder(params.len())
                                }
                            };
                            format!("{} {} {}", column, comparison.operator(), rendered)
                        }
                    }
                })
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        if !self.order_by.is_empty() {
            let ordering: Vec<String> = self
                .order_by
                .iter()
                .map(|(column, descending)| {
                    let direction = if *descending { "DESC" } else { "ASC" };
                    format!("{}.{} {}", table, column, direction)
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&ordering.join(", "));
        }

        if let Some(limit) = self.limit {
            match dialect {
                Dialect::MsSql => {}
                Dialect::Oracle => sql.push_str(&format!(" FETCH FIRST {} ROWS ONLY", limit)),
                _ => sql.push_str(&format!(" LIMIT {}", limit)),
            }
        }

        sql
    }
}
