//! Statement execution engine.
//!
//! This module runs compiled statements against a [`DbPool`] with support for:
//! - Parameterized statements
//! - Statement timeouts
//! - All-or-nothing batches inside a transaction
//! - Decoding result rows into [`Record`]s of a declared table
//!
//! # Architecture
//!
//! The executor uses database-specific implementations organized in submodules:
//! - `mysql`: MySQL-specific execution
//! - `postgres`: PostgreSQL-specific execution
//! - `sqlite`: SQLite-specific execution
//!
//! Each submodule provides identical functionality adapted to the database's type system.

use crate::db::pool::DbPool;
use crate::db::types::DecodeRow;
use crate::error::{DbError, DbResult};
use crate::impl_db_dispatch;
use crate::models::{CompiledQuery, Record, SqlValue, Table};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Default statement timeout in seconds.
pub const DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 30;

/// Executes compiled statements on a pool.
#[derive(Debug, Clone, Copy)]
pub struct QueryExecutor {
    statement_timeout: Duration,
}

impl QueryExecutor {
    /// Create a new executor with default settings.
    pub fn new() -> Self {
        Self {
            statement_timeout: Duration::from_secs(DEFAULT_STATEMENT_TIMEOUT_SECS),
        }
    }

    /// Execute one statement outside of an explicit transaction.
    pub async fn execute(&self, pool: &DbPool, sql: &str, params: &[SqlValue]) -> DbResult<u64> {
        debug!(sql = %sql, params = params.len(), "Executing statement");
        let t = self.statement_timeout;
        impl_db_dispatch!(pool, {
            MySql(p) => mysql::execute(p, sql, params, t).await,
            Postgres(p) => postgres::execute(p, sql, params, t).await,
            SQLite(p) => sqlite::execute(p, sql, params, t).await,
        })
    }

    /// Execute statements in order inside one transaction.
    ///
    /// The transaction is committed only if every statement succeeds; otherwise it
    /// is rolled back and the first error is returned unchanged.
    pub async fn execute_in_transaction(
        &self,
        pool: &DbPool,
        statements: &[CompiledQuery],
    ) -> DbResult<u64> {
        debug!(statements = statements.len(), "Executing transaction");
        let t = self.statement_timeout;
        impl_db_dispatch!(pool, {
            MySql(p) => mysql::execute_in_transaction(p, statements, t).await,
            Postgres(p) => postgres::execute_in_transaction(p, statements, t).await,
            SQLite(p) => sqlite::execute_in_transaction(p, statements, t).await,
        })
    }

    /// Fetch rows selected with every column of `table` and decode them.
    pub async fn fetch_records(
        &self,
        pool: &DbPool,
        query: &CompiledQuery,
        table: &Arc<Table>,
    ) -> DbResult<Vec<Record>> {
        debug!(sql = %query.sql, params = query.params.len(), "Fetching records");
        let t = self.statement_timeout;
        let records: Vec<Record> = impl_db_dispatch!(pool, {
            MySql(p) => mysql::fetch(p, query, t)
                .await?
                .iter()
                .map(|row| row.decode_record(table))
                .collect(),
            Postgres(p) => postgres::fetch(p, query, t)
                .await?
                .iter()
                .map(|row| row.decode_record(table))
                .collect(),
            SQLite(p) => sqlite::fetch(p, query, t)
                .await?
                .iter()
                .map(|row| row.decode_record(table))
                .collect(),
        });
        Ok(records)
    }

    /// Fetch the first column of every row as text.
    pub async fn fetch_texts(&self, pool: &DbPool, sql: &str) -> DbResult<Vec<String>> {
        let query = CompiledQuery::new(sql, Vec::new());
        let t = self.statement_timeout;
        let texts: Vec<String> = impl_db_dispatch!(pool, {
            MySql(p) => mysql::fetch(p, &query, t)
                .await?
                .iter()
                .filter_map(|row| row.first_text())
                .collect(),
            Postgres(p) => postgres::fetch(p, &query, t)
                .await?
                .iter()
                .filter_map(|row| row.first_text())
                .collect(),
            SQLite(p) => sqlite::fetch(p, &query, t)
                .await?
                .iter()
                .filter_map(|row| row.first_text())
                .collect(),
        });
        Ok(texts)
    }

    /// Fetch a single integer, e.g. a `COUNT(*)`.
    pub async fn fetch_int(&self, pool: &DbPool, query: &CompiledQuery) -> DbResult<i64> {
        let t = self.statement_timeout;
        let value = impl_db_dispatch!(pool, {
            MySql(p) => mysql::fetch(p, query, t).await?.first().and_then(|r| r.first_int()),
            Postgres(p) => postgres::fetch(p, query, t).await?.first().and_then(|r| r.first_int()),
            SQLite(p) => sqlite::fetch(p, query, t).await?.first().and_then(|r| r.first_int()),
        });
        value.ok_or_else(|| DbError::internal("Query did not return an integer"))
    }
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Common Helper Functions
// =============================================================================

fn timeout_error(operation: &str, timeout: Duration) -> DbError {
    DbError::timeout(operation, timeout.as_secs() as u32)
}

/// Roll back after a failed statement. The statement's error is what the caller sees.
async fn rollback_after_failure<DB: sqlx::Database>(tx: sqlx::Transaction<'_, DB>) {
    if let Err(e) = tx.rollback().await {
        warn!(error = %e, "Rollback after failed statement also failed");
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.
// The code structure is intentionally parallel to make differences obvious.

mod mysql {
    use super::*;
    use crate::db::params::bind_mysql_param;
    use sqlx::MySqlPool;
    use sqlx::mysql::MySqlRow;

    pub async fn execute(
        pool: &MySqlPool,
        sql: &str,
        params: &[SqlValue],
        query_timeout: Duration,
    ) -> DbResult<u64> {
        // Raw SQL when there are no params, some DDL cannot be prepared
        let result = if params.is_empty() {
            use sqlx::Executor;
            timeout(query_timeout, pool.execute(sql)).await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_mysql_param(query, param);
            }
            timeout(query_timeout, query.execute(pool)).await
        };

        match result {
            Ok(Ok(r)) => Ok(r.rows_affected()),
            Ok(Err(e)) => Err(DbError::from(e)),
            Err(_) => Err(timeout_error("statement execution", query_timeout)),
        }
    }

    pub async fn execute_in_transaction(
        pool: &MySqlPool,
        statements: &[CompiledQuery],
        query_timeout: Duration,
    ) -> DbResult<u64> {
        let mut tx = pool.begin().await?;
        let mut affected = 0;
        for statement in statements {
            let mut query = sqlx::query(&statement.sql);
            for param in &statement.params {
                query = bind_mysql_param(query, param);
            }
            match timeout(query_timeout, query.execute(&mut *tx)).await {
                Ok(Ok(r)) => affected += r.rows_affected(),
                Ok(Err(e)) => {
                    rollback_after_failure(tx).await;
                    return Err(DbError::from(e));
                }
                Err(_) => {
                    rollback_after_failure(tx).await;
                    return Err(timeout_error("transaction statement", query_timeout));
                }
            }
        }
        tx.commit().await?;
        Ok(affected)
    }

    pub async fn fetch(
        pool: &MySqlPool,
        query: &CompiledQuery,
        query_timeout: Duration,
    ) -> DbResult<Vec<MySqlRow>> {
        let result = if query.params.is_empty() {
            use sqlx::Executor;
            timeout(query_timeout, pool.fetch_all(query.sql.as_str())).await
        } else {
            let mut q = sqlx::query(&query.sql);
            for param in &query.params {
                q = bind_mysql_param(q, param);
            }
            timeout(query_timeout, q.fetch_all(pool)).await
        };

        match result {
            Ok(rows) => rows.map_err(DbError::from),
            Err(_) => Err(timeout_error("query execution", query_timeout)),
        }
    }
}

mod postgres {
    use super::*;
    use crate::db::params::bind_postgres_param;
    use sqlx::PgPool;
    use sqlx::postgres::PgRow;

    pub async fn execute(
        pool: &PgPool,
        sql: &str,
        params: &[SqlValue],
        query_timeout: Duration,
    ) -> DbResult<u64> {
        let result = if params.is_empty() {
            use sqlx::Executor;
            timeout(query_timeout, pool.execute(sql)).await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_postgres_param(query, param);
            }
            timeout(query_timeout, query.execute(pool)).await
        };

        match result {
            Ok(Ok(r)) => Ok(r.rows_affected()),
            Ok(Err(e)) => Err(DbError::from(e)),
            Err(_) => Err(timeout_error("statement execution", query_timeout)),
        }
    }

    pub async fn execute_in_transaction(
        pool: &PgPool,
        statements: &[CompiledQuery],
        query_timeout: Duration,
    ) -> DbResult<u64> {
        let mut tx = pool.begin().await?;
        let mut affected = 0;
        for statement in statements {
            let mut query = sqlx::query(&statement.sql);
            for param in &statement.params {
                query = bind_postgres_param(query, param);
            }
            match timeout(query_timeout, query.execute(&mut *tx)).await {
                Ok(Ok(r)) => affected += r.rows_affected(),
                Ok(Err(e)) => {
                    rollback_after_failure(tx).await;
                    return Err(DbError::from(e));
                }
                Err(_) => {
                    rollback_after_failure(tx).await;
                    return Err(timeout_error("transaction statement", query_timeout));
                }
            }
        }
        tx.commit().await?;
        Ok(affected)
    }

    pub async fn fetch(
        pool: &PgPool,
        query: &CompiledQuery,
        query_timeout: Duration,
    ) -> DbResult<Vec<PgRow>> {
        let result = if query.params.is_empty() {
            use sqlx::Executor;
            timeout(query_timeout, pool.fetch_all(query.sql.as_str())).await
        } else {
            let mut q = sqlx::query(&query.sql);
            for param in &query.params {
                q = bind_postgres_param(q, param);
            }
            timeout(query_timeout, q.fetch_all(pool)).await
        };

        match result {
            Ok(rows) => rows.map_err(DbError::from),
            Err(_) => Err(timeout_error("query execution", query_timeout)),
        }
    }
}

mod sqlite {
    use super::*;
    use crate::db::params::bind_sqlite_param;
    use sqlx::SqlitePool;
    use sqlx::sqlite::SqliteRow;

    pub async fn execute(
        pool: &SqlitePool,
        sql: &str,
        params: &[SqlValue],
        query_timeout: Duration,
    ) -> DbResult<u64> {
        let result = if params.is_empty() {
            use sqlx::Executor;
            timeout(query_timeout, pool.execute(sql)).await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_sqlite_param(query, param);
            }
            timeout(query_timeout, query.execute(pool)).await
        };

        match result {
            Ok(Ok(r)) => Ok(r.rows_affected()),
            Ok(Err(e)) => Err(DbError::from(e)),
            Err(_) => Err(timeout_error("statement execution", query_timeout)),
        }
    }

    pub async fn execute_in_transaction(
        pool: &SqlitePool,
        statements: &[CompiledQuery],
        query_timeout: Duration,
    ) -> DbResult<u64> {
        let mut tx = pool.begin().await?;
        let mut affected = 0;
        for statement in statements {
            let mut query = sqlx::query(&statement.sql);
            for param in &statement.params {
                query = bind_sqlite_param(query, param);
            }
            match timeout(query_timeout, query.execute(&mut *tx)).await {
                Ok(Ok(r)) => affected += r.rows_affected(),
                Ok(Err(e)) => {
                    rollback_after_failure(tx).await;
                    return Err(DbError::from(e));
                }
                Err(_) => {
                    rollback_after_failure(tx).await;
                    return Err(timeout_error("transaction statement", query_timeout));
                }
            }
        }
        tx.commit().await?;
        Ok(affected)
    }

    pub async fn fetch(
        pool: &SqlitePool,
        query: &CompiledQuery,
        query_timeout: Duration,
    ) -> DbResult<Vec<SqliteRow>> {
        let result = if query.params.is_empty() {
            use sqlx::Executor;
            timeout(query_timeout, pool.fetch_all(query.sql.as_str())).await
        } else {
            let mut q = sqlx::query(&query.sql);
            for param in &query.params {
                q = bind_sqlite_param(q, param);
            }
            timeout(query_timeout, q.fetch_all(pool)).await
        };

        match result {
            Ok(rows) => rows.map_err(DbError::from),
            Err(_) => Err(timeout_error("query execution", query_timeout)),
        }
    }
}
