//! Row values bound to a declared table.

use crate::db::Dialect;
use crate::error::{DbError, DbResult};
use crate::models::query::{CompiledQuery, SqlValue};
use crate::models::schema::{Table, TableKind};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

static WORD_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(.)([A-Z][a-z]+)").expect("valid regex"));
static LOWER_UPPER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-z0-9])([A-Z])").expect("valid regex"));

/// Convert a camelCase or PascalCase key to snake_case.
///
/// Keys that are already snake_case are returned unchanged.
pub fn to_snake_case(key: &str) -> String {
    let first = WORD_BOUNDARY.replace_all(key, "${1}_${2}");
    LOWER_UPPER
        .replace_all(&first, "${1}_${2}")
        .to_lowercase()
}

/// One row of a declared table.
///
/// Only declared columns can be set. Columns that were never set are left out of
/// inserts so the backend applies its defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    table: Arc<Table>,
    values: BTreeMap<String, SqlValue>,
}

impl Record {
    pub fn new(table: Arc<Table>) -> Self {
        Self {
            table,
            values: BTreeMap::new(),
        }
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    /// Set a declared column.
    pub fn set(&mut self, column: &str, value: impl Into<SqlValue>) -> DbResult<&mut Self> {
        self.table.require_column(column)?;
        self.values.insert(column.to_string(), value.into());
        Ok(self)
    }

    /// Builder form of [`Record::set`].
    pub fn with(mut self, column: &str, value: impl Into<SqlValue>) -> DbResult<Self> {
        self.set(column, value)?;
        Ok(self)
    }

    pub(crate) fn set_unchecked(&mut self, column: &str, value: SqlValue) {
        self.values.insert(column.to_string(), value);
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.values.get(column)
    }

    /// Values in column declaration order.
    pub fn values(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.table
            .columns()
            .iter()
            .filter_map(|c| self.values.get(&c.name).map(|v| (c.name.as_str(), v)))
    }

    /// Populate columns from externally named keys.
    ///
    /// Keys may use any casing (`FileName`, `fileName`, `file_name`); they are
    /// converted to snake_case before lookup. Keys with no matching column are
    /// ignored. An existing value is only replaced when `overwrite` is set or the
    /// current value is NULL.
    pub fn populate<I, K, V>(&mut self, data: I, overwrite: bool) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<SqlValue>,
    {
        for (key, value) in data {
            let column = to_snake_case(key.as_ref());
            if self.table.column(&column).is_none() {
                continue;
            }
            let replace = overwrite
                || self
                    .values
                    .get(&column)
                    .map(SqlValue::is_null)
                    .unwrap_or(true);
            if replace {
                self.values.insert(column, value.into());
            }
        }
        self
    }

    /// [`Record::populate`] from a JSON object.
    pub fn populate_json(
        &mut self,
        data: &serde_json::Map<String, JsonValue>,
        overwrite: bool,
    ) -> &mut Self {
        self.populate(
            data.iter().map(|(k, v)| (k.as_str(), SqlValue::from_json(v))),
            overwrite,
        )
    }

    /// JSON object of the set values. Binary values are base64 encoded.
    pub fn to_json(&self) -> serde_json::Map<String, JsonValue> {
        self.values()
            .map(|(name, value)| {
                let json = match value {
                    SqlValue::Null => JsonValue::Null,
                    SqlValue::Bool(v) => JsonValue::Bool(*v),
                    SqlValue::Int(v) => JsonValue::from(*v),
                    SqlValue::Float(v) => serde_json::Number::from_f64(*v)
                        .map(JsonValue::Number)
                        .unwrap_or(JsonValue::Null),
                    SqlValue::Text(v) => JsonValue::String(v.clone()),
                    SqlValue::Timestamp(v) => JsonValue::String(v.to_rfc3339()),
                    SqlValue::Bytes(v) => JsonValue::String(BASE64.encode(v)),
                };
                (name.to_string(), json)
            })
            .collect()
    }

    fn ensure_writable(&self) -> DbResult<()> {
        match self.table.kind() {
            TableKind::Table => Ok(()),
            TableKind::View => Err(DbError::schema(
                "Views are read-only and cannot be written through a session",
                self.table.name(),
            )),
        }
    }

    /// `INSERT` of the non-NULL values.
    pub fn insert_statement(&self, dialect: Dialect) -> DbResult<CompiledQuery> {
        self.ensure_writable()?;
        let (columns, params): (Vec<&str>, Vec<SqlValue>) = self
            .values()
            .filter(|(_, v)| !v.is_null())
            .map(|(name, v)| (name, v.clone()))
            .unzip();

        let table = self.table.name();
        if columns.is_empty() {
            let sql = match dialect {
                Dialect::MySQL => format!("INSERT INTO {} () VALUES ()", table),
                _ => format!("INSERT INTO {} DEFAULT VALUES", table),
            };
            return Ok(CompiledQuery::new(sql, Vec::new()));
        }

        let placeholders: Vec<String> = (1..=params.len()).map(|i| dialect.placeholder(i)).collect();
        Ok(CompiledQuery::new(
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                columns.join(", "),
                placeholders.join(", ")
            ),
            params,
        ))
    }

    /// `DELETE` by primary key. Every primary key column must be set.
    pub fn delete_statement(&self, dialect: Dialect) -> DbResult<CompiledQuery> {
        self.ensure_writable()?;
        let primary_key = self.table.primary_key();
        if primary_key.is_empty() {
            return Err(DbError::schema(
                "Cannot delete from a table without a primary key",
                self.table.name(),
            ));
        }

        let mut conditions = Vec::with_capacity(primary_key.len());
        let mut params = Vec::with_capacity(primary_key.len());
        for column in primary_key {
            match self.values.get(&column.name) {
                Some(value) if !value.is_null() => {
                    params.push(value.clone());
                    conditions.push(format!(
                        "{} = {}",
                        column.name,
                        dialect.placeholder(params.len())
                    ));
                }
                _ => {
                    return Err(DbError::invalid_input(format!(
                        "Cannot delete from '{}': primary key column '{}' is not set",
                        self.table.name(),
                        column.name
                    )));
                }
            }
        }

        Ok(CompiledQuery::new(
            format!(
                "DELETE FROM {} WHERE {}",
                self.table.name(),
                conditions.join(" AND ")
            ),
            params,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fields;
    use crate::models::schema::TableBuilder;

    fn ledger() -> Arc<Table> {
        Arc::new(
            TableBuilder::new("fileledger")
                .with_fields(fields::file_ledger())
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_snake_case_conversion() {
        assert_eq!(to_snake_case("FileName"), "file_name");
        assert_eq!(to_snake_case("fileName"), "file_name");
        assert_eq!(to_snake_case("file_name"), "file_name");
        assert_eq!(to_snake_case("MD5Hash"), "md5_hash");
        assert_eq!(to_snake_case("Sha2hash"), "sha2hash");
        assert_eq!(to_snake_case("ModifyTime"), "modify_time");
    }

    #[test]
    fn test_populate_maps_keys_and_ignores_unknown() {
        let mut record = Record::new(ledger());
        record.populate(
            [
                ("FileName", SqlValue::from("a.log")),
                ("filePath", SqlValue::from("/tmp/a.log")),
                ("file_size", SqlValue::from(10)),
                ("NotAColumn", SqlValue::from(1)),
            ],
            true,
        );
        assert_eq!(record.get("file_name"), Some(&SqlValue::Text("a.log".into())));
        assert_eq!(record.get("file_path"), Some(&SqlValue::Text("/tmp/a.log".into())));
        assert_eq!(record.get("file_size"), Some(&SqlValue::Int(10)));
        assert_eq!(record.values().count(), 3);
    }

    #[test]
    fn test_populate_without_overwrite_keeps_values() {
        let mut record = Record::new(ledger())
            .with("file_name", "kept.log")
            .unwrap()
            .with("md5hash", SqlValue::Null)
            .unwrap();
        record.populate([("FileName", "other.log"), ("Md5hash", "abc")], false);
        assert_eq!(record.get("file_name"), Some(&SqlValue::Text("kept.log".into())));
        assert_eq!(record.get("md5hash"), Some(&SqlValue::Text("abc".into())));
    }

    #[test]
    fn test_populate_json() {
        let data = serde_json::json!({"FileName": "j.log", "fileSize": 3, "extra": true});
        let mut record = Record::new(ledger());
        record.populate_json(data.as_object().unwrap(), true);
        assert_eq!(record.get("file_size"), Some(&SqlValue::Int(3)));
        assert!(record.get("extra").is_none());
    }

    #[test]
    fn test_set_unknown_column_is_attribute_error() {
        let mut record = Record::new(ledger());
        assert!(matches!(
            record.set("nope", 1),
            Err(DbError::Attribute { .. })
        ));
    }

    #[test]
    fn test_insert_statement_skips_unset_and_null() {
        let record = Record::new(ledger())
            .with("file_name", "a.log")
            .unwrap()
            .with("md5hash", SqlValue::Null)
            .unwrap()
            .with("file_size", 4)
            .unwrap();
        let insert = record.insert_statement(Dialect::PostgreSQL).unwrap();
        assert_eq!(
            insert.sql,
            "INSERT INTO fileledger (file_name, file_size) VALUES ($1, $2)"
        );
        assert_eq!(insert.params.len(), 2);
    }

    #[test]
    fn test_delete_statement_requires_primary_key() {
        let record = Record::new(ledger()).with("file_name", "a.log").unwrap();
        assert!(record.delete_statement(Dialect::SQLite).is_err());

        let record = record.with("id", 7).unwrap();
        let delete = record.delete_statement(Dialect::SQLite).unwrap();
        assert_eq!(delete.sql, "DELETE FROM fileledger WHERE id = ?");
        assert_eq!(delete.params, vec![SqlValue::Int(7)]);
    }

    #[test]
    fn test_to_json_encodes_bytes() {
        let table = Arc::new(
            TableBuilder::new("blobs")
                .column(crate::models::Column::new("id", crate::models::ColumnType::Integer).primary_key())
                .column(crate::models::Column::new("data", crate::models::ColumnType::Binary))
                .build()
                .unwrap(),
        );
        let record = Record::new(table)
            .with("id", 1)
            .unwrap()
            .with("data", vec![1u8, 2, 3])
            .unwrap();
        let json = record.to_json();
        assert_eq!(json["id"], serde_json::json!(1));
        assert_eq!(json["data"], serde_json::json!("AQID"));
    }
}
