//! Decoding of backend rows into declared column values.
//!
//! Rows are decoded against the declared [`ColumnType`] of the model being queried,
//! so every backend yields the same [`SqlValue`] shape. Each declared type lists the
//! Rust types to attempt in order; the first one the driver accepts wins. Backends
//! differ in how they store the same portable type (SQLite keeps booleans as
//! integers, PostgreSQL `SERIAL` is a 32-bit integer) and the fallbacks absorb that.

use crate::models::{ColumnType, Record, SqlValue, Table};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::Row;
use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use std::sync::Arc;

/// Decode a fetched row into typed values.
pub trait DecodeRow {
    /// Decode column `idx` as `column_type`. Undecodable values become NULL.
    fn decode_value(&self, idx: usize, column_type: &ColumnType) -> SqlValue;

    /// Decode a row selected with every column of `table`, in declaration order.
    fn decode_record(&self, table: &Arc<Table>) -> Record {
        let mut record = Record::new(Arc::clone(table));
        for (idx, column) in table.columns().iter().enumerate() {
            let value = self.decode_value(idx, &column.column_type);
            record.set_unchecked(&column.name, value);
        }
        record
    }

    /// First column as text, for catalog and version queries.
    fn first_text(&self) -> Option<String>;

    /// First column as an integer, for counts.
    fn first_int(&self) -> Option<i64>;
}

/// Try each `type => constructor` pair in order until one decodes.
macro_rules! decode_first {
    ($row:expr, $idx:expr, $($ty:ty => $wrap:expr),+ $(,)?) => {{
        let mut decoded: Option<SqlValue> = None;
        $(
            if decoded.is_none() {
                match $row.try_get::<Option<$ty>, _>($idx) {
                    Ok(Some(v)) => decoded = Some(($wrap)(v)),
                    Ok(None) => decoded = Some(SqlValue::Null),
                    Err(_) => {}
                }
            }
        )+
        decoded.unwrap_or(SqlValue::Null)
    }};
}

macro_rules! impl_decode_row {
    ($row:ty) => {
        impl DecodeRow for $row {
            fn decode_value(&self, idx: usize, column_type: &ColumnType) -> SqlValue {
                match column_type {
                    ColumnType::Integer => decode_first!(self, idx,
                        i64 => SqlValue::Int,
                        i32 => |v: i32| SqlValue::Int(v.into()),
                        i16 => |v: i16| SqlValue::Int(v.into()),
                        bool => |v: bool| SqlValue::Int(v.into()),
                    ),
                    ColumnType::Boolean => decode_first!(self, idx,
                        bool => SqlValue::Bool,
                        i64 => |v: i64| SqlValue::Bool(v != 0),
                        i32 => |v: i32| SqlValue::Bool(v != 0),
                        i16 => |v: i16| SqlValue::Bool(v != 0),
                    ),
                    ColumnType::Float => decode_first!(self, idx,
                        f64 => SqlValue::Float,
                        f32 => |v: f32| SqlValue::Float(v.into()),
                        i64 => |v: i64| SqlValue::Float(v as f64),
                    ),
                    ColumnType::String(_) | ColumnType::Text => decode_first!(self, idx,
                        String => SqlValue::Text,
                        Vec<u8> => |v: Vec<u8>| SqlValue::Text(String::from_utf8_lossy(&v).into_owned()),
                    ),
                    ColumnType::Timestamp { .. } => decode_first!(self, idx,
                        DateTime<Utc> => SqlValue::Timestamp,
                        NaiveDateTime => |v: NaiveDateTime| SqlValue::Timestamp(v.and_utc()),
                        String => SqlValue::Text,
                    ),
                    ColumnType::Binary => decode_first!(self, idx,
                        Vec<u8> => SqlValue::Bytes,
                    ),
                }
            }

            fn first_text(&self) -> Option<String> {
                self.try_get::<Option<String>, _>(0).ok().flatten().or_else(|| {
                    self.try_get::<Option<Vec<u8>>, _>(0)
                        .ok()
                        .flatten()
                        .map(|v| String::from_utf8_lossy(&v).into_owned())
                })
            }

            fn first_int(&self) -> Option<i64> {
                self.try_get::<i64, _>(0)
                    .ok()
                    .or_else(|| self.try_get::<i32, _>(0).ok().map(i64::from))
            }
        }
    };
}

impl_decode_row!(MySqlRow);
impl_decode_row!(PgRow);
impl_decode_row!(SqliteRow);
