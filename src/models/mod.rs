//! Data models for the session manager.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod fields;
pub mod query;
pub mod record;
pub mod schema;

// Re-export commonly used types
pub use connection::{ConnectionDescriptor, DatabaseType};
pub use query::{
    ColumnExpr, Comparison, CompiledQuery, Predicate, Select, SelectColumn, SqlValue,
};
pub use record::{Record, to_snake_case};
pub use schema::{
    Column, ColumnType, DdlElement, FieldSet, ForeignKey, ForeignKeyAction, Index, IndexSpec,
    LifecycleHook, LifecyclePhase, MySqlTableOptions, SchemaMetadata, Table, TableBuilder,
    TableKind,
};
