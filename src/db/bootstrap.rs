//! Applying schema metadata to an engine.
//!
//! The apply sequence is fixed: `BeforeCreate` hooks, then every table that does not
//! exist yet (with its indexes), then `AfterCreate` hooks. Dropping mirrors it:
//! `BeforeDrop` hooks, tables in reverse declaration order, then `AfterDrop` hooks.

use crate::db::executor::QueryExecutor;
use crate::db::pool::Engine;
use crate::db::Dialect;
use crate::error::DbResult;
use crate::models::{DatabaseType, LifecyclePhase, SchemaMetadata};
use std::collections::HashSet;
use tracing::{debug, info};

/// What an apply run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub tables_created: Vec<String>,
    /// Tables that already existed
    pub tables_skipped: Vec<String>,
    pub hooks_run: usize,
}

/// Applies a [`SchemaMetadata`] container to an engine.
#[derive(Debug, Clone, Copy)]
pub struct SchemaBootstrapper<'a> {
    metadata: &'a SchemaMetadata,
    executor: QueryExecutor,
}

impl<'a> SchemaBootstrapper<'a> {
    pub fn new(metadata: &'a SchemaMetadata) -> Self {
        Self {
            metadata,
            executor: QueryExecutor::new(),
        }
    }

    /// All create statements, in execution order, without consulting a backend.
    pub fn create_ddl(&self, dialect: Dialect) -> Vec<String> {
        let mut statements = self.hook_statements(LifecyclePhase::BeforeCreate, dialect);
        for table in self.metadata.tables() {
            statements.extend(table.create_statements(dialect));
        }
        statements.extend(self.hook_statements(LifecyclePhase::AfterCreate, dialect));
        statements
    }

    /// All drop statements, in execution order.
    pub fn drop_ddl(&self, dialect: Dialect) -> Vec<String> {
        let mut statements = self.hook_statements(LifecyclePhase::BeforeDrop, dialect);
        for table in self.metadata.tables().iter().rev() {
            statements.push(table.drop_statement(dialect));
        }
        statements.extend(self.hook_statements(LifecyclePhase::AfterDrop, dialect));
        statements
    }

    /// Create the declared schema, skipping tables that already exist.
    pub async fn apply(&self, engine: &Engine) -> DbResult<BootstrapReport> {
        let dialect = engine.dialect();
        let existing = self.existing_tables(engine).await?;
        let mut report = BootstrapReport::default();

        report.hooks_run += self.run_hooks(engine, LifecyclePhase::BeforeCreate).await?;

        for table in self.metadata.tables() {
            if existing.contains(&table.name().to_lowercase()) {
                debug!(table = %table.name(), "Table exists, skipping");
                report.tables_skipped.push(table.name().to_string());
                continue;
            }
            for statement in table.create_statements(dialect) {
                debug!(table = %table.name(), sql = %statement, "Emitting DDL");
                self.executor.execute(engine.pool(), &statement, &[]).await?;
            }
            report.tables_created.push(table.name().to_string());
        }

        report.hooks_run += self.run_hooks(engine, LifecyclePhase::AfterCreate).await?;

        info!(
            dialect = %dialect,
            created = report.tables_created.len(),
            skipped = report.tables_skipped.len(),
            hooks = report.hooks_run,
            "Schema bootstrapped"
        );
        Ok(report)
    }

    /// Drop the declared schema.
    pub async fn teardown(&self, engine: &Engine) -> DbResult<()> {
        let dialect = engine.dialect();
        let hooks_before = self.run_hooks(engine, LifecyclePhase::BeforeDrop).await?;
        for table in self.metadata.tables().iter().rev() {
            let statement = table.drop_statement(dialect);
            debug!(table = %table.name(), sql = %statement, "Emitting DDL");
            self.executor.execute(engine.pool(), &statement, &[]).await?;
        }
        let hooks_after = self.run_hooks(engine, LifecyclePhase::AfterDrop).await?;
        info!(
            dialect = %dialect,
            tables = self.metadata.tables().len(),
            hooks = hooks_before + hooks_after,
            "Schema torn down"
        );
        Ok(())
    }

    fn hook_statements(&self, phase: LifecyclePhase, dialect: Dialect) -> Vec<String> {
        self.metadata
            .hooks(phase)
            .flat_map(|element| element.compile(dialect))
            .collect()
    }

    async fn run_hooks(&self, engine: &Engine, phase: LifecyclePhase) -> DbResult<usize> {
        let dialect = engine.dialect();
        let mut count = 0;
        for element in self.metadata.hooks(phase) {
            for statement in element.compile(dialect) {
                debug!(
                    phase = ?phase,
                    object = %element.target(),
                    sql = %statement,
                    "Running lifecycle hook"
                );
                self.executor.execute(engine.pool(), &statement, &[]).await?;
            }
            count += 1;
        }
        Ok(count)
    }

    /// Lowercased names of the tables present in the current schema.
    async fn existing_tables(&self, engine: &Engine) -> DbResult<HashSet<String>> {
        let sql = match engine.db_type() {
            DatabaseType::SQLite => "SELECT name FROM sqlite_master WHERE type = 'table'",
            DatabaseType::PostgreSQL => {
                "SELECT table_name::text FROM information_schema.tables \
                 WHERE table_schema = current_schema()"
            }
            DatabaseType::MySQL => {
                "SELECT CAST(table_name AS CHAR) FROM information_schema.tables \
                 WHERE table_schema = DATABASE()"
            }
        };
        let names = self.executor.fetch_texts(engine.pool(), sql).await?;
        Ok(names.into_iter().map(|n| n.to_lowercase()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::view::create_view;
    use crate::models::{Select, fields};

    #[test]
    fn test_create_ddl_order() {
        let mut metadata = SchemaMetadata::file_ledger().unwrap();
        let ledger = metadata.require_table(fields::FILE_LEDGER_TABLE).unwrap().clone();
        let select = Select::columns(&ledger, &["id", "file_name"])
            .unwrap()
            .filter_eq("completed", true)
            .unwrap();
        create_view("completed_files", select, &mut metadata, false).unwrap();

        let statements = SchemaBootstrapper::new(&metadata).create_ddl(Dialect::PostgreSQL);
        assert!(statements[0].starts_with("CREATE TABLE fileledger"));
        let last = statements.last().unwrap();
        assert_eq!(
            last,
            "CREATE OR REPLACE VIEW completed_files AS SELECT fileledger.id, fileledger.file_name \
             FROM fileledger WHERE fileledger.completed = TRUE"
        );
    }

    #[test]
    fn test_drop_ddl_order() {
        let mut metadata = SchemaMetadata::file_ledger().unwrap();
        let ledger = metadata.require_table(fields::FILE_LEDGER_TABLE).unwrap().clone();
        create_view("all_files", Select::from_table(&ledger), &mut metadata, true).unwrap();

        let statements = SchemaBootstrapper::new(&metadata).drop_ddl(Dialect::PostgreSQL);
        assert_eq!(
            statements,
            vec![
                "DROP MATERIALIZED VIEW IF EXISTS all_files",
                "DROP TABLE IF EXISTS filestructure",
                "DROP TABLE IF EXISTS filelink",
                "DROP TABLE IF EXISTS fileledger",
            ]
        );
    }
}
