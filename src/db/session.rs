//! Sessions and session factories.
//!
//! A [`Session`] is a unit of work: inserts and deletes are staged in memory and
//! only reach the backend on [`Session::commit`], which flushes them in order inside
//! one transaction. A session never holds a pooled connection between calls.
//!
//! Sessions come from a [`SessionFactory`]:
//! - [`PlainFactory`] makes an independent session per call.
//! - [`ScopedFactory`] keeps one session per execution context and hands the same
//!   session back to every caller in that context until [`ScopedFactory::remove`].
//!
//! The default context is the current thread. Async code that may hop threads
//! between `.await` points should run inside [`with_scope`], which names the
//! context explicitly for the wrapped future.

use crate::db::executor::QueryExecutor;
use crate::db::pool::Engine;
use crate::error::{DbError, DbResult};
use crate::models::{Comparison, Record, Select, SqlValue, Table};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::ThreadId;
use tracing::{debug, info};
use uuid::Uuid;

tokio::task_local! {
    static CURRENT_SCOPE: String;
}

/// Run `future` with every scoped session lookup keyed by `name`.
pub async fn with_scope<F: Future>(name: impl Into<String>, future: F) -> F::Output {
    CURRENT_SCOPE.scope(name.into(), future).await
}

/// Identifies the execution context a scoped session belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    Thread(ThreadId),
    Named(String),
}

impl ScopeKey {
    /// The named scope of the current task if one is set, else the current thread.
    pub fn current() -> Self {
        CURRENT_SCOPE
            .try_with(|name| Self::Named(name.clone()))
            .unwrap_or_else(|_| Self::Thread(std::thread::current().id()))
    }
}

#[derive(Debug, Clone)]
enum PendingOp {
    Insert(Record),
    Delete(Record),
}

#[derive(Debug)]
struct SessionInner {
    id: Uuid,
    engine: Engine,
    pending: Mutex<Vec<PendingOp>>,
}

/// A unit of work on one engine.
///
/// Clones share state: a clone is the same session, not a copy.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Session {}

impl Session {
    fn new(engine: Engine) -> Self {
        let session = Self {
            inner: Arc::new(SessionInner {
                id: Uuid::new_v4(),
                engine,
                pending: Mutex::new(Vec::new()),
            }),
        };
        debug!(session_id = %session.id(), "Session created");
        session
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    fn pending(&self) -> MutexGuard<'_, Vec<PendingOp>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of staged operations.
    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    /// Stage an insert.
    pub fn add(&self, record: Record) -> DbResult<()> {
        // Fail now rather than at commit
        record.insert_statement(self.engine().dialect())?;
        self.pending().push(PendingOp::Insert(record));
        Ok(())
    }

    /// Stage a delete by primary key.
    pub fn delete(&self, record: Record) -> DbResult<()> {
        record.delete_statement(self.engine().dialect())?;
        self.pending().push(PendingOp::Delete(record));
        Ok(())
    }

    /// Flush staged operations in one transaction and commit it.
    ///
    /// The staged operations are consumed whether or not the commit succeeds. On
    /// failure the backend transaction is rolled back and the error is returned.
    pub async fn commit(&self) -> DbResult<u64> {
        let ops = std::mem::take(&mut *self.pending());
        if ops.is_empty() {
            debug!(session_id = %self.id(), "Nothing to commit");
            return Ok(0);
        }

        let dialect = self.engine().dialect();
        let statements = ops
            .iter()
            .map(|op| match op {
                PendingOp::Insert(record) => record.insert_statement(dialect),
                PendingOp::Delete(record) => record.delete_statement(dialect),
            })
            .collect::<DbResult<Vec<_>>>()?;

        let affected = QueryExecutor::new()
            .execute_in_transaction(self.engine().pool(), &statements)
            .await?;
        info!(
            session_id = %self.id(),
            operations = statements.len(),
            rows_affected = affected,
            "Session committed"
        );
        Ok(affected)
    }

    /// Discard staged operations, returning how many were dropped.
    pub fn rollback(&self) -> usize {
        let discarded = std::mem::take(&mut *self.pending()).len();
        info!(session_id = %self.id(), discarded = discarded, "Session rolled back");
        discarded
    }

    /// Release the session. Staged operations are discarded.
    pub fn close(&self) {
        let discarded = std::mem::take(&mut *self.pending()).len();
        debug!(session_id = %self.id(), discarded = discarded, "Session closed");
    }

    /// Start a query over every column of `model`.
    pub fn query(&self, model: &Arc<Table>) -> FilteredQuery {
        FilteredQuery {
            select: Select::from_table(model),
            engine: self.engine().clone(),
        }
    }
}

/// A query bound to a session's engine.
#[derive(Debug, Clone)]
pub struct FilteredQuery {
    select: Select,
    engine: Engine,
}

impl FilteredQuery {
    /// Add an equality filter on a declared column.
    pub fn filter_eq(self, column: &str, value: impl Into<SqlValue>) -> DbResult<Self> {
        self.filter(column, Comparison::Eq, value)
    }

    pub fn filter(
        mut self,
        column: &str,
        comparison: Comparison,
        value: impl Into<SqlValue>,
    ) -> DbResult<Self> {
        self.select = self.select.filter(column, comparison, value)?;
        Ok(self)
    }

    pub fn order_by(mut self, column: &str, descending: bool) -> DbResult<Self> {
        self.select = self.select.order_by(column, descending)?;
        Ok(self)
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.select = self.select.limit(limit);
        self
    }

    pub fn select(&self) -> &Select {
        &self.select
    }

    /// Every matching row.
    pub async fn all(&self) -> DbResult<Vec<Record>> {
        let compiled = self.select.compile(self.engine.dialect());
        QueryExecutor::new()
            .fetch_records(self.engine.pool(), &compiled, self.select.source())
            .await
    }

    /// The first matching row, if any.
    pub async fn first(&self) -> DbResult<Option<Record>> {
        let select = self.select.clone().limit(1);
        let compiled = select.compile(self.engine.dialect());
        let mut records = QueryExecutor::new()
            .fetch_records(self.engine.pool(), &compiled, select.source())
            .await?;
        Ok(records.pop())
    }

    /// Number of matching rows.
    pub async fn count(&self) -> DbResult<u64> {
        let compiled = self.select.compile_count(self.engine.dialect());
        let count = QueryExecutor::new()
            .fetch_int(self.engine.pool(), &compiled)
            .await?;
        u64::try_from(count).map_err(|_| DbError::internal("Negative row count"))
    }
}

/// Makes an independent session per call.
#[derive(Debug, Clone)]
pub struct PlainFactory {
    engine: Engine,
}

impl PlainFactory {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    pub fn create(&self) -> Session {
        Session::new(self.engine.clone())
    }
}

type ScopeFn = Arc<dyn Fn() -> ScopeKey + Send + Sync>;

/// Keeps one session per execution context.
#[derive(Clone)]
pub struct ScopedFactory {
    engine: Engine,
    registry: Arc<Mutex<HashMap<ScopeKey, Session>>>,
    scope_fn: ScopeFn,
}

impl std::fmt::Debug for ScopedFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedFactory")
            .field("engine", &self.engine)
            .field("active_scopes", &self.active_scopes())
            .finish()
    }
}

impl ScopedFactory {
    /// Scope sessions by [`ScopeKey::current`].
    pub fn new(engine: Engine) -> Self {
        Self::with_scope_fn(engine, ScopeKey::current)
    }

    /// Scope sessions by a custom context key, e.g. a request id.
    pub fn with_scope_fn(
        engine: Engine,
        scope_fn: impl Fn() -> ScopeKey + Send + Sync + 'static,
    ) -> Self {
        Self {
            engine,
            registry: Arc::new(Mutex::new(HashMap::new())),
            scope_fn: Arc::new(scope_fn),
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<ScopeKey, Session>> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The current context's session, created on first use.
    pub fn session(&self) -> Session {
        let key = (self.scope_fn)();
        self.registry()
            .entry(key)
            .or_insert_with_key(|key| {
                debug!(scope = ?key, "Creating scoped session");
                Session::new(self.engine.clone())
            })
            .clone()
    }

    pub fn has_session(&self) -> bool {
        self.registry().contains_key(&(self.scope_fn)())
    }

    /// Close and forget the current context's session.
    pub fn remove(&self) -> bool {
        let key = (self.scope_fn)();
        let removed = self.registry().remove(&key);
        match removed {
            Some(session) => {
                session.close();
                debug!(scope = ?key, session_id = %session.id(), "Scoped session removed");
                true
            }
            None => false,
        }
    }

    pub fn active_scopes(&self) -> usize {
        self.registry().len()
    }
}

/// The factory a manager was initialized with.
#[derive(Debug, Clone)]
pub enum SessionFactory {
    Plain(PlainFactory),
    Scoped(ScopedFactory),
}

impl SessionFactory {
    pub fn is_scoped(&self) -> bool {
        matches!(self, Self::Scoped(_))
    }

    pub fn engine(&self) -> &Engine {
        match self {
            Self::Plain(factory) => &factory.engine,
            Self::Scoped(factory) => &factory.engine,
        }
    }
}

/// Result of asking a manager for a session.
///
/// Plain mode hands out a session; scoped mode hands out the factory, from which
/// each context obtains its own session.
#[derive(Debug, Clone)]
pub enum SessionHandle {
    Plain(Session),
    Scoped(ScopedFactory),
}

impl SessionHandle {
    /// The session for the calling context.
    pub fn session(&self) -> Session {
        match self {
            Self::Plain(session) => session.clone(),
            Self::Scoped(factory) => factory.session(),
        }
    }

    pub fn is_scoped(&self) -> bool {
        matches!(self, Self::Scoped(_))
    }

    pub fn as_factory(&self) -> Option<&ScopedFactory> {
        match self {
            Self::Plain(_) => None,
            Self::Scoped(factory) => Some(factory),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConnectionDescriptor;

    fn engine() -> Engine {
        Engine::open(&ConnectionDescriptor::parse("sqlite::memory:").unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_plain_factory_creates_distinct_sessions() {
        let factory = PlainFactory::new(engine());
        let a = factory.create();
        let b = factory.create();
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[tokio::test]
    async fn test_scoped_factory_reuses_within_scope() {
        let factory = ScopedFactory::new(engine());
        let first = with_scope("request-1", async { factory.session() }).await;
        let again = with_scope("request-1", async { factory.session() }).await;
        let other = with_scope("request-2", async { factory.session() }).await;
        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(factory.active_scopes(), 2);

        assert!(with_scope("request-1", async { factory.remove() }).await);
        assert!(!with_scope("request-1", async { factory.has_session() }).await);
        assert_eq!(factory.active_scopes(), 1);
    }

    #[tokio::test]
    async fn test_scoped_factory_defaults_to_thread() {
        let factory = ScopedFactory::new(engine());
        let here = factory.session();
        assert_eq!(here, factory.session());

        let cloned = factory.clone();
        let there = std::thread::spawn(move || cloned.session()).join().unwrap();
        assert_ne!(here, there);
    }

    #[tokio::test]
    async fn test_rollback_discards_pending() {
        let session = PlainFactory::new(engine()).create();
        let table = Arc::new(
            crate::models::TableBuilder::new("t")
                .column(crate::models::Column::new("id", crate::models::ColumnType::Integer).primary_key())
                .build()
                .unwrap(),
        );
        session.add(Record::new(table.clone()).with("id", 1).unwrap()).unwrap();
        session.delete(Record::new(table).with("id", 2).unwrap()).unwrap();
        assert_eq!(session.pending_count(), 2);
        assert_eq!(session.rollback(), 2);
        assert_eq!(session.pending_count(), 0);
        assert_eq!(session.commit().await.unwrap(), 0);
    }
}
