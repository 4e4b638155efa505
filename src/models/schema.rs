//! Schema declaration models.
//!
//! Tables are assembled by composition: columns and index specifications are grouped
//! into [`FieldSet`]s and combined with a [`TableBuilder`]. The resulting tables, plus
//! the ordered lifecycle hooks that views register, live in a [`SchemaMetadata`]
//! container that the bootstrapper applies to an engine.

use crate::db::{Dialect, PortableExpr};
use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Portable column type, rendered per dialect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Boolean,
    Float,
    /// Character type with an optional declared length
    String(Option<u32>),
    /// Text whose concrete type depends on the dialect
    Text,
    Timestamp { timezone: bool },
    Binary,
}

/// Foreign key referential action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForeignKeyAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ForeignKeyAction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub references_table: String,
    pub references_column: String,
    pub on_delete: ForeignKeyAction,
    pub on_update: ForeignKeyAction,
}

impl ForeignKey {
    pub fn new(references_table: impl Into<String>, references_column: impl Into<String>) -> Self {
        Self {
            references_table: references_table.into(),
            references_column: references_column.into(),
            on_delete: ForeignKeyAction::NoAction,
            on_update: ForeignKeyAction::NoAction,
        }
    }

    pub fn with_on_delete(mut self, action: ForeignKeyAction) -> Self {
        self.on_delete = action;
        self
    }

    pub fn with_on_update(mut self, action: ForeignKeyAction) -> Self {
        self.on_update = action;
        self
    }
}

/// A declared column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub primary_key: bool,
    pub nullable: bool,
    /// Create a single-column index named `ix_<table>_<column>`
    pub index: bool,
    pub server_default: Option<PortableExpr>,
    pub foreign_key: Option<ForeignKey>,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            primary_key: false,
            nullable: true,
            index: false,
            server_default: None,
            foreign_key: None,
        }
    }

    /// Primary key columns are never nullable.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.index = true;
        self
    }

    pub fn server_default(mut self, expr: PortableExpr) -> Self {
        self.server_default = Some(expr);
        self
    }

    pub fn references(mut self, foreign_key: ForeignKey) -> Self {
        self.foreign_key = Some(foreign_key);
        self
    }
}

/// A declared index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// An index whose name is derived from the table it ends up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Becomes `idx_<table>_<suffix>`
    pub suffix: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// MySQL `CREATE TABLE` options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MySqlTableOptions {
    pub engine: String,
    pub charset: String,
}

impl Default for MySqlTableOptions {
    fn default() -> Self {
        Self {
            engine: "InnoDB".to_string(),
            charset: "utf8mb4".to_string(),
        }
    }
}

/// Whether a table shape is physically stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Table,
    View,
}

/// A reusable group of columns and index specifications.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSet {
    pub columns: Vec<Column>,
    pub indexes: Vec<IndexSpec>,
    pub mysql_options: Option<MySqlTableOptions>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn index(mut self, suffix: impl Into<String>, columns: &[&str]) -> Self {
        self.indexes.push(IndexSpec {
            suffix: suffix.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
        });
        self
    }

    pub fn mysql_options(mut self, options: MySqlTableOptions) -> Self {
        self.mysql_options = Some(options);
        self
    }

    /// Append another field set after this one.
    pub fn extend(mut self, other: FieldSet) -> Self {
        self.columns.extend(other.columns);
        self.indexes.extend(other.indexes);
        if other.mysql_options.is_some() {
            self.mysql_options = other.mysql_options;
        }
        self
    }
}

/// A table (or view-shaped) definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    name: String,
    kind: TableKind,
    columns: Vec<Column>,
    indexes: Vec<Index>,
    mysql_options: Option<MySqlTableOptions>,
}

impl Table {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn indexes(&self) -> &[Index] {
        &self.indexes
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Look up a declared column, failing with an attribute error.
    pub fn require_column(&self, name: &str) -> DbResult<&Column> {
        self.column(name)
            .ok_or_else(|| DbError::attribute(&self.name, name))
    }

    pub fn primary_key(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.primary_key).collect()
    }

    fn autoincrement_column(&self) -> Option<&Column> {
        match self.primary_key().as_slice() {
            [only] if only.column_type == ColumnType::Integer => Some(*only),
            _ => None,
        }
    }

    /// `CREATE TABLE` followed by its `CREATE INDEX` statements.
    pub fn create_statements(&self, dialect: Dialect) -> Vec<String> {
        let mut statements = vec![self.create_table_sql(dialect)];
        statements.extend(self.create_index_sql(dialect));
        statements
    }

    pub fn drop_statement(&self, _dialect: Dialect) -> String {
        format!("DROP TABLE IF EXISTS {}", self.name)
    }

    fn create_table_sql(&self, dialect: Dialect) -> String {
        let autoincrement = self.autoincrement_column().map(|c| c.name.as_str());
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| render_column(c, dialect, autoincrement == Some(c.name.as_str())))
            .collect();

        let pk: Vec<&str> = self.primary_key().iter().map(|c| c.name.as_str()).collect();
        if !pk.is_empty() {
            parts.push(format!("PRIMARY KEY ({})", pk.join(", ")));
        }

        for column in &self.columns {
            if let Some(fk) = &column.foreign_key {
                let mut clause = format!(
                    "FOREIGN KEY({}) REFERENCES {} ({})",
                    column.name, fk.references_table, fk.references_column
                );
                if fk.on_delete != ForeignKeyAction::NoAction {
                    clause.push_str(&format!(" ON DELETE {}", fk.on_delete.as_sql()));
                }
                // Oracle has no ON UPDATE clause
                if fk.on_update != ForeignKeyAction::NoAction && dialect != Dialect::Oracle {
                    clause.push_str(&format!(" ON UPDATE {}", fk.on_update.as_sql()));
                }
                parts.push(clause);
            }
        }

        let mut sql = format!("CREATE TABLE {} (\n\t{}\n)", self.name, parts.join(",\n\t"));
        if let (Dialect::MySQL, Some(options)) = (dialect, &self.mysql_options) {
            sql.push_str(&format!(
                " ENGINE={} DEFAULT CHARSET={}",
                options.engine, options.charset
            ));
        }
        sql
    }

    fn create_index_sql(&self, dialect: Dialect) -> Vec<String> {
        self.indexes
            .iter()
            .map(|index| {
                let columns: Vec<String> = index
                    .columns
                    .iter()
                    .map(|name| match self.column(name) {
                        Some(c) => dialect.render_index_column(name, &c.column_type),
                        None => name.clone(),
                    })
                    .collect();
                format!(
                    "CREATE {}INDEX {} ON {} ({})",
                    if index.unique { "UNIQUE " } else { "" },
                    index.name,
                    self.name,
                    columns.join(", ")
                )
            })
            .collect()
    }
}

fn render_column(column: &Column, dialect: Dialect, autoincrement: bool) -> String {
    let column_type = if autoincrement {
        dialect.render_autoincrement_type().to_string()
    } else {
        dialect.render_type(&column.column_type)
    };
    let mut sql = format!("{} {}", column.name, column_type);
    if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    if let Some(expr) = column.server_default {
        sql.push_str(&format!(" DEFAULT {}", dialect.render_default(expr)));
    }
    if autoincrement {
        if let Some(suffix) = dialect.autoincrement_suffix() {
            sql.push(' ');
            sql.push_str(suffix);
        }
    }
    sql
}

/// Assembles a [`Table`] from columns and field sets.
#[derive(Debug, Clone)]
pub struct TableBuilder {
    name: String,
    kind: TableKind,
    fields: FieldSet,
    indexes: Vec<Index>,
}

impl TableBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TableKind::Table,
            fields: FieldSet::new(),
            indexes: Vec::new(),
        }
    }

    /// Build a view-shaped table (no storage of its own).
    pub fn view(name: impl Into<String>) -> Self {
        Self {
            kind: TableKind::View,
            ..Self::new(name)
        }
    }

    pub fn with_fields(mut self, fields: FieldSet) -> Self {
        self.fields = self.fields.extend(fields);
        self
    }

    pub fn column(mut self, column: Column) -> Self {
        self.fields.columns.push(column);
        self
    }

    /// Add an explicitly named index.
    pub fn index(mut self, name: impl Into<String>, columns: &[&str], unique: bool) -> Self {
        self.indexes.push(Index {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique,
        });
        self
    }

    /// Validate and produce the table.
    ///
    /// Fails on duplicate column names and on indexes naming undeclared columns.
    pub fn build(self) -> DbResult<Table> {
        if self.name.trim().is_empty() {
            return Err(DbError::schema("Table name cannot be empty", ""));
        }

        let mut seen = HashSet::new();
        for column in &self.fields.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(DbError::schema(
                    format!("Duplicate column '{}'", column.name),
                    &self.name,
                ));
            }
        }

        let mut indexes = Vec::new();
        if self.kind == TableKind::Table {
            for column in self.fields.columns.iter().filter(|c| c.index) {
                indexes.push(Index {
                    name: format!("ix_{}_{}", self.name, column.name),
                    columns: vec![column.name.clone()],
                    unique: false,
                });
            }
            for spec in &self.fields.indexes {
                indexes.push(Index {
                    name: format!("idx_{}_{}", self.name, spec.suffix),
                    columns: spec.columns.clone(),
                    unique: spec.unique,
                });
            }
            indexes.extend(self.indexes);
        }

        for index in &indexes {
            if let Some(missing) = index.columns.iter().find(|c| !seen.contains(c.as_str())) {
                return Err(DbError::schema(
                    format!("Index '{}' references unknown column '{}'", index.name, missing),
                    &self.name,
                ));
            }
        }

        Ok(Table {
            name: self.name,
            kind: self.kind,
            columns: self.fields.columns,
            indexes,
            mysql_options: self.fields.mysql_options,
        })
    }
}

/// Points in the schema apply/drop sequence where hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecyclePhase {
    BeforeCreate,
    AfterCreate,
    BeforeDrop,
    AfterDrop,
}

/// A DDL statement emitted from a lifecycle hook.
pub trait DdlElement: std::fmt::Debug + Send + Sync {
    /// Render the statements for a dialect, in execution order.
    fn compile(&self, dialect: Dialect) -> Vec<String>;

    /// Name of the object the statement acts on, for logging.
    fn target(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct LifecycleHook {
    pub phase: LifecyclePhase,
    pub element: Arc<dyn DdlElement>,
}

/// Ordered container of table definitions and lifecycle hooks.
#[derive(Debug, Clone, Default)]
pub struct SchemaMetadata {
    tables: Vec<Arc<Table>>,
    hooks: Vec<LifecycleHook>,
}

impl SchemaMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table, returning the shared handle used by queries and records.
    pub fn add_table(&mut self, table: Table) -> DbResult<Arc<Table>> {
        if table.kind() == TableKind::View {
            return Err(DbError::schema(
                "Views are registered through create_view, not as tables",
                table.name(),
            ));
        }
        if self.table(table.name()).is_some() {
            return Err(DbError::schema("Table is already defined", table.name()));
        }
        let table = Arc::new(table);
        self.tables.push(Arc::clone(&table));
        Ok(table)
    }

    pub fn table(&self, name: &str) -> Option<&Arc<Table>> {
        self.tables.iter().find(|t| t.name() == name)
    }

    pub fn require_table(&self, name: &str) -> DbResult<&Arc<Table>> {
        self.table(name)
            .ok_or_else(|| DbError::schema("Table is not defined", name))
    }

    /// Tables in declaration order.
    pub fn tables(&self) -> &[Arc<Table>] {
        &self.tables
    }

    /// Register a hook. Hooks of one phase run in registration order.
    pub fn listen(&mut self, phase: LifecyclePhase, element: Arc<dyn DdlElement>) {
        self.hooks.push(LifecycleHook { phase, element });
    }

    pub fn hooks(&self, phase: LifecyclePhase) -> impl Iterator<Item = &Arc<dyn DdlElement>> {
        self.hooks
            .iter()
            .filter(move |h| h.phase == phase)
            .map(|h| &h.element)
    }
}
