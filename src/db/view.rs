//! View DDL generation bound to the schema lifecycle.
//!
//! A view is declared over a [`Select`]. Declaring it registers its create statement
//! as an `AfterCreate` hook and its drop statement as a `BeforeDrop` hook on the
//! schema metadata, so it is emitted whenever the schema is applied or dropped.
//!
//! Materialized views exist only on PostgreSQL. On every other dialect a
//! materialized view silently becomes a plain view, for both create and drop.
//! SQLite has no `CREATE OR REPLACE VIEW`, so its create hook drops the view first.

use crate::db::Dialect;
use crate::error::DbResult;
use crate::models::{
    Column, DdlElement, LifecyclePhase, SchemaMetadata, Select, Table, TableBuilder,
};
use std::sync::Arc;
use tracing::debug;

/// `CREATE ... VIEW` statement of a view.
#[derive(Debug, Clone)]
pub struct CreateView {
    name: String,
    select: Select,
    materialized: bool,
}

impl DdlElement for CreateView {
    fn compile(&self, dialect: Dialect) -> Vec<String> {
        // DDL cannot carry bind parameters
        let body = self.select.compile_inline(dialect);
        if self.materialized && dialect.supports_materialized_views() {
            vec![format!(
                "CREATE OR REPLACE MATERIALIZED VIEW {} AS {}",
                self.name, body
            )]
        } else if dialect.supports_create_or_replace_view() {
            vec![format!("CREATE OR REPLACE VIEW {} AS {}", self.name, body)]
        } else {
            // No OR REPLACE on SQLite
            vec![
                format!("DROP VIEW IF EXISTS {}", self.name),
                format!("CREATE VIEW {} AS {}", self.name, body),
            ]
        }
    }

    fn target(&self) -> &str {
        &self.name
    }
}

/// `DROP ... VIEW` statement of a view.
#[derive(Debug, Clone)]
pub struct DropView {
    name: String,
    materialized: bool,
}

impl DdlElement for DropView {
    fn compile(&self, dialect: Dialect) -> Vec<String> {
        if self.materialized && dialect.supports_materialized_views() {
            vec![format!("DROP MATERIALIZED VIEW IF EXISTS {}", self.name)]
        } else {
            vec![format!("DROP VIEW IF EXISTS {}", self.name)]
        }
    }

    fn target(&self) -> &str {
        &self.name
    }
}

/// A declared view and the table shape derived from its select.
#[derive(Debug, Clone)]
pub struct ViewDefinition {
    table: Arc<Table>,
    create: Arc<CreateView>,
    drop: Arc<DropView>,
}

impl ViewDefinition {
    pub fn name(&self) -> &str {
        self.table.name()
    }

    pub fn is_materialized(&self) -> bool {
        self.create.materialized
    }

    /// The view's columns as a queryable table shape with no storage of its own.
    pub fn as_table(&self) -> &Arc<Table> {
        &self.table
    }

    pub fn select(&self) -> &Select {
        &self.create.select
    }

    /// Statements that create (or replace) the view.
    pub fn create_sql(&self, dialect: Dialect) -> Vec<String> {
        self.create.compile(dialect)
    }

    pub fn drop_sql(&self, dialect: Dialect) -> Vec<String> {
        self.drop.compile(dialect)
    }

    /// `REFRESH MATERIALIZED VIEW` for a materialized view on PostgreSQL.
    pub fn refresh_sql(&self, dialect: Dialect) -> Option<String> {
        (self.is_materialized() && dialect.supports_materialized_views())
            .then(|| format!("REFRESH MATERIALIZED VIEW {}", self.name()))
    }
}

/// Declare a view over `select` and bind its DDL to `metadata`'s lifecycle.
///
/// The returned definition's columns mirror the select's output columns (name, type
/// and primary-key flag).
pub fn create_view(
    name: &str,
    select: Select,
    metadata: &mut SchemaMetadata,
    materialized: bool,
) -> DbResult<ViewDefinition> {
    let table = select
        .output_columns()
        .iter()
        .fold(TableBuilder::view(name), |builder, output| {
            let column = Column::new(output.name.clone(), output.column_type.clone());
            builder.column(if output.primary_key {
                column.primary_key()
            } else {
                column
            })
        })
        .build()?;

    let create = Arc::new(CreateView {
        name: name.to_string(),
        select,
        materialized,
    });
    let drop = Arc::new(DropView {
        name: name.to_string(),
        materialized,
    });
    metadata.listen(LifecyclePhase::AfterCreate, create.clone());
    metadata.listen(LifecyclePhase::BeforeDrop, drop.clone());
    debug!(view = %name, materialized = materialized, "View declared");

    Ok(ViewDefinition {
        table: Arc::new(table),
        create,
        drop,
    })
}
