//! Backend-specific rendering of portable types and expressions.
//!
//! A [`Dialect`] is the compiler a portable node is rendered through. Every rule is an
//! exhaustive match over the dialect tag, with the generic rendering as the fallback
//! arm for backends that have no specific rule.

use crate::models::{ColumnType, DatabaseType, SqlValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Length used when a character type needs a bound and none was declared.
pub const DEFAULT_STRING_LENGTH: u32 = 255;

/// Text form of SQLite timestamps, the same one `CURRENT_TIMESTAMP` produces.
pub const SQLITE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Format a timestamp the way SQLite stores it, both when bound and when inlined.
pub fn sqlite_timestamp(value: &DateTime<Utc>) -> String {
    value.format(SQLITE_TIMESTAMP_FORMAT).to_string()
}

/// SQL variant a statement is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Generic ANSI-ish SQL
    #[default]
    Default,
    PostgreSQL,
    MySQL,
    MsSql,
    Oracle,
    SQLite,
}

/// Portable expression nodes with a backend-specific spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortableExpr {
    /// The current timestamp in UTC, used as a server-side column default.
    UtcTimestamp,
}

impl Dialect {
    pub const ALL: [Dialect; 6] = [
        Dialect::Default,
        Dialect::PostgreSQL,
        Dialect::MySQL,
        Dialect::MsSql,
        Dialect::Oracle,
        Dialect::SQLite,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::PostgreSQL => "postgresql",
            Self::MySQL => "mysql",
            Self::MsSql => "mssql",
            Self::Oracle => "oracle",
            Self::SQLite => "sqlite",
        }
    }

    /// Only PostgreSQL stores view results physically.
    pub fn supports_materialized_views(&self) -> bool {
        matches!(self, Self::PostgreSQL)
    }

    /// SQLite has no `CREATE OR REPLACE VIEW`.
    pub fn supports_create_or_replace_view(&self) -> bool {
        !matches!(self, Self::SQLite)
    }

    /// Bind placeholder for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Self::PostgreSQL => format!("${}", index),
            Self::MsSql => format!("@p{}", index),
            Self::Oracle => format!(":{}", index),
            _ => "?".to_string(),
        }
    }

    /// Render a portable expression.
    pub fn render_expr(&self, expr: PortableExpr) -> &'static str {
        match expr {
            PortableExpr::UtcTimestamp => match self {
                Self::MsSql => "GETUTCDATE()",
                Self::MySQL => "UTC_TIMESTAMP()",
                Self::Oracle => "SYS_EXTRACT_UTC(SYSTIMESTAMP)",
                Self::PostgreSQL => "(NOW() AT TIME ZONE 'UTC')",
                Self::SQLite | Self::Default => "CURRENT_TIMESTAMP",
            },
        }
    }

    /// Render a portable expression as the body of a `DEFAULT` clause.
    ///
    /// MySQL only accepts function calls other than `CURRENT_TIMESTAMP` as
    /// parenthesized default expressions.
    pub fn render_default(&self, expr: PortableExpr) -> String {
        let rendered = self.render_expr(expr);
        match self {
            Self::MySQL if !rendered.starts_with('(') => format!("({})", rendered),
            _ => rendered.to_string(),
        }
    }

    /// Render a portable column type.
    pub fn render_type(&self, column_type: &ColumnType) -> String {
        match column_type {
            ColumnType::Integer => match self {
                Self::Oracle => "NUMBER(10)".to_string(),
                _ => "INTEGER".to_string(),
            },
            ColumnType::Boolean => match self {
                Self::MsSql => "BIT".to_string(),
                Self::Oracle => "NUMBER(1)".to_string(),
                Self::MySQL => "BOOL".to_string(),
                _ => "BOOLEAN".to_string(),
            },
            ColumnType::Float => match self {
                Self::PostgreSQL => "DOUBLE PRECISION".to_string(),
                Self::MySQL => "DOUBLE".to_string(),
                Self::SQLite => "REAL".to_string(),
                Self::Oracle => "BINARY_DOUBLE".to_string(),
                _ => "FLOAT".to_string(),
            },
            ColumnType::String(length) => {
                let length = length.unwrap_or(DEFAULT_STRING_LENGTH);
                match self {
                    Self::Oracle => format!("VARCHAR2({})", length),
                    _ => format!("VARCHAR({})", length),
                }
            }
            ColumnType::Text => match self {
                Self::PostgreSQL => "TEXT".to_string(),
                Self::MsSql => "NVARCHAR(max)".to_string(),
                Self::MySQL => "LONGTEXT CHARACTER SET utf8mb4".to_string(),
                _ => format!("VARCHAR({})", DEFAULT_STRING_LENGTH),
            },
            ColumnType::Timestamp { timezone } => match (self, timezone) {
                (Self::PostgreSQL | Self::Oracle, true) => "TIMESTAMP WITH TIME ZONE".to_string(),
                (Self::MsSql, true) => "DATETIMEOFFSET".to_string(),
                (Self::MsSql, false) => "DATETIME2".to_string(),
                _ => "TIMESTAMP".to_string(),
            },
            ColumnType::Binary => match self {
                Self::PostgreSQL => "BYTEA".to_string(),
                Self::MsSql => "VARBINARY(max)".to_string(),
                _ => "BLOB".to_string(),
            },
        }
    }

    /// Column type of a single-column integer primary key that the backend numbers itself.
    pub fn render_autoincrement_type(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "SERIAL",
            Self::MsSql => "INTEGER IDENTITY(1,1)",
            Self::Oracle => "NUMBER(10) GENERATED BY DEFAULT AS IDENTITY",
            _ => "INTEGER",
        }
    }

    /// Trailing column attribute for an autoincrement key, where one is needed.
    pub fn autoincrement_suffix(&self) -> Option<&'static str> {
        match self {
            Self::MySQL => Some("AUTO_INCREMENT"),
            _ => None,
        }
    }

    /// Render an index column reference.
    ///
    /// MySQL cannot index unbounded text without a prefix length.
    pub fn render_index_column(&self, name: &str, column_type: &ColumnType) -> String {
        match (self, column_type) {
            (Self::MySQL, ColumnType::Text) => format!("{}({})", name, DEFAULT_STRING_LENGTH),
            _ => name.to_string(),
        }
    }

    /// Render a value as an inline SQL literal.
    pub fn render_literal(&self, value: &SqlValue) -> String {
        match value {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(v) => match self {
                Self::PostgreSQL | Self::Default => (if *v { "TRUE" } else { "FALSE" }).to_string(),
                _ => (if *v { "1" } else { "0" }).to_string(),
            },
            SqlValue::Int(v) => v.to_string(),
            SqlValue::Float(v) if v.is_finite() => format!("{:?}", v),
            SqlValue::Float(_) => "NULL".to_string(),
            SqlValue::Text(v) => self.quote_string(v),
            SqlValue::Timestamp(v) => match self {
                // Compared as text, so it must match the bound form exactly
                Self::SQLite => format!("'{}'", sqlite_timestamp(v)),
                Self::PostgreSQL | Self::Oracle | Self::Default => {
                    format!("TIMESTAMP '{}'", v.format("%Y-%m-%d %H:%M:%S%.6f"))
                }
                Self::MySQL | Self::MsSql => format!("'{}'", v.format("%Y-%m-%d %H:%M:%S%.6f")),
            },
            SqlValue::Bytes(v) => {
                let encoded = hex::encode_upper(v);
                match self {
                    Self::PostgreSQL => format!("'\\x{}'::bytea", encoded),
                    Self::MsSql => format!("0x{}", encoded),
                    Self::Oracle => format!("HEXTORAW('{}')", encoded),
                    _ => format!("X'{}'", encoded),
                }
            }
        }
    }

    fn quote_string(&self, value: &str) -> String {
        let escaped = value.replace('\'', "''");
        match self {
            // MySQL treats backslash as an escape character inside literals
            Self::MySQL => format!("'{}'", escaped.replace('\\', "\\\\")),
            Self::MsSql => format!("N'{}'", escaped),
            _ => format!("'{}'", escaped),
        }
    }
}

impl From<DatabaseType> for Dialect {
    fn from(db_type: DatabaseType) -> Self {
        match db_type {
            DatabaseType::PostgreSQL => Self::PostgreSQL,
            DatabaseType::MySQL => Self::MySQL,
            DatabaseType::SQLite => Self::SQLite,
        }
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" | "generic" => Ok(Self::Default),
            "postgresql" | "postgres" | "pg" => Ok(Self::PostgreSQL),
            "mysql" | "mariadb" => Ok(Self::MySQL),
            "mssql" | "sqlserver" => Ok(Self::MsSql),
            "oracle" => Ok(Self::Oracle),
            "sqlite" => Ok(Self::SQLite),
            other => Err(format!(
                "Unknown dialect '{}'. Expected one of: default, postgresql, mysql, mssql, oracle, sqlite",
                other
            )),
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_utc_timestamp_per_dialect() {
        let expr = PortableExpr::UtcTimestamp;
        assert_eq!(Dialect::MsSql.render_expr(expr), "GETUTCDATE()");
        assert_eq!(Dialect::MySQL.render_expr(expr), "UTC_TIMESTAMP()");
        assert_eq!(
            Dialect::Oracle.render_expr(expr),
            "SYS_EXTRACT_UTC(SYSTIMESTAMP)"
        );
        assert_eq!(
            Dialect::PostgreSQL.render_expr(expr),
            "(NOW() AT TIME ZONE 'UTC')"
        );
        assert_eq!(Dialect::SQLite.render_expr(expr), "CURRENT_TIMESTAMP");
        assert_eq!(Dialect::Default.render_expr(expr), "CURRENT_TIMESTAMP");
    }

    #[test]
    fn test_mysql_default_is_parenthesized() {
        let expr = PortableExpr::UtcTimestamp;
        assert_eq!(Dialect::MySQL.render_default(expr), "(UTC_TIMESTAMP())");
        assert_eq!(
            Dialect::PostgreSQL.render_default(expr),
            "(NOW() AT TIME ZONE 'UTC')"
        );
        assert_eq!(Dialect::SQLite.render_default(expr), "CURRENT_TIMESTAMP");
    }

    #[test]
    fn test_portable_text_type() {
        assert_eq!(Dialect::PostgreSQL.render_type(&ColumnType::Text), "TEXT");
        assert_eq!(Dialect::MsSql.render_type(&ColumnType::Text), "NVARCHAR(max)");
        assert!(Dialect::MySQL.render_type(&ColumnType::Text).starts_with("LONGTEXT"));
        assert_eq!(Dialect::Default.render_type(&ColumnType::Text), "VARCHAR(255)");
        assert_eq!(Dialect::SQLite.render_type(&ColumnType::Text), "VARCHAR(255)");
    }

    #[test]
    fn test_timestamp_types() {
        let tz = ColumnType::Timestamp { timezone: true };
        assert_eq!(
            Dialect::PostgreSQL.render_type(&tz),
            "TIMESTAMP WITH TIME ZONE"
        );
        assert_eq!(Dialect::MsSql.render_type(&tz), "DATETIMEOFFSET");
        assert_eq!(Dialect::SQLite.render_type(&tz), "TIMESTAMP");
    }

    #[test]
    fn test_materialization_capability() {
        for dialect in Dialect::ALL {
            assert_eq!(
                dialect.supports_materialized_views(),
                dialect == Dialect::PostgreSQL
            );
        }
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(Dialect::PostgreSQL.placeholder(2), "$2");
        assert_eq!(Dialect::MySQL.placeholder(2), "?");
        assert_eq!(Dialect::SQLite.placeholder(1), "?");
    }

    #[test]
    fn test_string_literals_are_escaped() {
        let value = SqlValue::Text("O'Brien\\".to_string());
        assert_eq!(Dialect::SQLite.render_literal(&value), "'O''Brien\\'");
        assert_eq!(Dialect::MySQL.render_literal(&value), "'O''Brien\\\\'");
        assert_eq!(Dialect::MsSql.render_literal(&value), "N'O''Brien\\'");
    }

    #[test]
    fn test_boolean_and_binary_literals() {
        assert_eq!(Dialect::PostgreSQL.render_literal(&SqlValue::Bool(true)), "TRUE");
        assert_eq!(Dialect::SQLite.render_literal(&SqlValue::Bool(true)), "1");
        let bytes = SqlValue::Bytes(vec![0xde, 0xad]);
        assert_eq!(Dialect::PostgreSQL.render_literal(&bytes), "'\\xDEAD'::bytea");
        assert_eq!(Dialect::SQLite.render_literal(&bytes), "X'DEAD'");
    }

    #[test]
    fn test_timestamp_literal() {
        let ts = Utc.with_ymd_and_hms(2019, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(
            Dialect::SQLite.render_literal(&SqlValue::Timestamp(ts)),
            "'2019-03-01 12:30:00'"
        );
        let fractional = Utc.with_ymd_and_hms(2019, 3, 1, 12, 30, 0).unwrap()
            + chrono::Duration::milliseconds(250);
        assert_eq!(
            Dialect::SQLite.render_literal(&SqlValue::Timestamp(fractional)),
            format!("'{}'", sqlite_timestamp(&fractional))
        );
        assert_eq!(sqlite_timestamp(&fractional), "2019-03-01 12:30:00.250");
        assert_eq!(
            Dialect::MySQL.render_literal(&SqlValue::Timestamp(ts)),
            "'2019-03-01 12:30:00.000000'"
        );
        assert_eq!(
            Dialect::PostgreSQL.render_literal(&SqlValue::Timestamp(ts)),
            "TIMESTAMP '2019-03-01 12:30:00.000000'"
        );
    }

    #[test]
    fn test_dialect_from_str() {
        assert_eq!("Postgres".parse::<Dialect>().unwrap(), Dialect::PostgreSQL);
        assert_eq!("generic".parse::<Dialect>().unwrap(), Dialect::Default);
        assert!("db2".parse::<Dialect>().is_err());
    }

    #[test]
    fn test_dialect_from_database_type() {
        assert_eq!(Dialect::from(DatabaseType::MySQL), Dialect::MySQL);
        assert_eq!(Dialect::from(DatabaseType::SQLite), Dialect::SQLite);
    }
}
