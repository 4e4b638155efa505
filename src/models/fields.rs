//! Reusable field sets for the file ledger schema.
//!
//! Each function returns a [`FieldSet`] that can be combined with others through
//! [`TableBuilder::with_fields`]. A ledger table is `base + file_ledger`, a table
//! linked to the ledger adds `ledger_link`, and tables describing a shared structure
//! add `shared_structure`.

use crate::db::PortableExpr;
use crate::error::DbResult;
use crate::models::schema::{
    Column, ColumnType, FieldSet, ForeignKey, ForeignKeyAction, MySqlTableOptions, SchemaMetadata,
    TableBuilder,
};

/// Name of the ledger table in the default schema.
pub const FILE_LEDGER_TABLE: &str = "fileledger";
pub const FILE_LINK_TABLE: &str = "filelink";
pub const FILE_STRUCTURE_TABLE: &str = "filestructure";

/// Integer primary key and creation timestamp shared by every table.
pub fn base() -> FieldSet {
    FieldSet::new()
        .column(Column::new("id", ColumnType::Integer).primary_key())
        .column(
            Column::new("created_at", ColumnType::Timestamp { timezone: true })
                .server_default(PortableExpr::UtcTimestamp)
                .indexed(),
        )
        .mysql_options(MySqlTableOptions::default())
}

/// Accounting columns describing one file on disk.
pub fn file_ledger() -> FieldSet {
    let timestamp = ColumnType::Timestamp { timezone: true };
    base()
        .column(Column::new("file_name", ColumnType::Text).not_null())
        .column(Column::new("file_path", ColumnType::Text).not_null())
        .column(Column::new("file_size", ColumnType::Integer).not_null())
        .column(Column::new("md5hash", ColumnType::Text))
        .column(Column::new("sha1hash", ColumnType::Text))
        .column(Column::new("sha2hash", ColumnType::Text))
        .column(Column::new("modify_time", timestamp.clone()))
        .column(Column::new("access_time", timestamp.clone()))
        .column(Column::new("create_time", timestamp))
        .column(Column::new("completed", ColumnType::Boolean).indexed())
}

/// Foreign key to a ledger table, cascading deletes and updates.
pub fn ledger_link(ledger_table: &str) -> FieldSet {
    FieldSet::new().column(
        Column::new("ledger_id", ColumnType::Integer)
            .not_null()
            .indexed()
            .references(
                ForeignKey::new(ledger_table, "id")
                    .with_on_delete(ForeignKeyAction::Cascade)
                    .with_on_update(ForeignKeyAction::Cascade),
            ),
    )
}

/// Identifies the structure a row belongs to.
pub fn shared_structure() -> FieldSet {
    FieldSet::new()
        .column(Column::new("structure_id", ColumnType::Integer).not_null())
        .column(Column::new("structure_type", ColumnType::Text).not_null())
        .index("structure", &["structure_id", "structure_type"])
}

impl SchemaMetadata {
    /// The default ledger schema: the ledger, a link table and a structure table.
    pub fn file_ledger() -> DbResult<Self> {
        let mut metadata = Self::new();
        metadata.add_table(
            TableBuilder::new(FILE_LEDGER_TABLE)
                .with_fields(file_ledger())
                .build()?,
        )?;
        metadata.add_table(
            TableBuilder::new(FILE_LINK_TABLE)
                .with_fields(base())
                .with_fields(ledger_link(FILE_LEDGER_TABLE))
                .column(Column::new("link_path", ColumnType::Text).not_null())
                .build()?,
        )?;
        metadata.add_table(
            TableBuilder::new(FILE_STRUCTURE_TABLE)
                .with_fields(base())
                .with_fields(ledger_link(FILE_LEDGER_TABLE))
                .with_fields(shared_structure())
                .build()?,
        )?;
        Ok(metadata)
    }
}
