//! Session lifecycle management.
//!
//! [`SessionManager`] composes a [`ConnectionManager`] with the session factory
//! built from its engine. It owns at most one persisted session in plain mode; in
//! scoped mode sessions are tracked per context by the factory instead.

use crate::db::pool::{ConnectionManager, Engine};
use crate::db::session::{
    FilteredQuery, PlainFactory, ScopeKey, ScopedFactory, Session, SessionFactory, SessionHandle,
};
use crate::error::{DbError, DbResult};
use crate::models::{Record, SchemaMetadata, SqlValue, Table};
use std::sync::Arc;
use tracing::{debug, info};

type ScopeFn = Arc<dyn Fn() -> ScopeKey + Send + Sync>;

/// Options for [`SessionManager::initialize`].
#[derive(Default)]
pub struct InitializeOptions {
    descriptor: Option<String>,
    metadata: Option<SchemaMetadata>,
    bootstrap: bool,
    scoped: bool,
    create_session: bool,
    scope_fn: Option<ScopeFn>,
}

impl std::fmt::Debug for InitializeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializeOptions")
            .field("has_descriptor", &self.descriptor.is_some())
            .field("has_metadata", &self.metadata.is_some())
            .field("bootstrap", &self.bootstrap)
            .field("scoped", &self.scoped)
            .field("create_session", &self.create_session)
            .field("custom_scope", &self.scope_fn.is_some())
            .finish()
    }
}

impl InitializeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn descriptor(mut self, descriptor: impl Into<String>) -> Self {
        self.descriptor = Some(descriptor.into());
        self
    }

    pub fn metadata(mut self, metadata: SchemaMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Apply the schema metadata after creating the engine.
    pub fn bootstrap(mut self, bootstrap: bool) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    pub fn scoped(mut self, scoped: bool) -> Self {
        self.scoped = scoped;
        self
    }

    /// Eagerly create and persist a session. Ignored in scoped mode.
    pub fn create_session(mut self, create_session: bool) -> Self {
        self.create_session = create_session;
        self
    }

    /// Key scoped sessions by a custom context. Implies nothing unless scoped.
    pub fn scope_fn(mut self, scope_fn: impl Fn() -> ScopeKey + Send + Sync + 'static) -> Self {
        self.scope_fn = Some(Arc::new(scope_fn));
        self
    }
}

/// Owns the engine, the session factory and the persisted session.
#[derive(Debug, Default)]
pub struct SessionManager {
    connections: ConnectionManager,
    factory: Option<SessionFactory>,
    session: Option<Session>,
    scoped_default: bool,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// A manager that uses scoped sessions unless told otherwise.
    pub fn scoped() -> Self {
        Self {
            scoped_default: true,
            ..Self::default()
        }
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn connections_mut(&mut self) -> &mut ConnectionManager {
        &mut self.connections
    }

    pub fn engine(&self) -> Option<&Engine> {
        self.connections.engine()
    }

    pub fn factory(&self) -> Option<&SessionFactory> {
        self.factory.as_ref()
    }

    pub fn is_scoped(&self) -> bool {
        self.factory
            .as_ref()
            .map(SessionFactory::is_scoped)
            .unwrap_or(self.scoped_default)
    }

    /// The persisted plain-mode session, if any.
    pub fn persisted_session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Set up the engine, schema and session factory in one call.
    ///
    /// Without a resolvable descriptor no engine is created and no factory is
    /// configured; the call still succeeds.
    pub async fn initialize(&mut self, options: InitializeOptions) -> DbResult<&mut Self> {
        if let Some(descriptor) = &options.descriptor {
            self.connections.set_descriptor(descriptor)?;
        }
        if let Some(metadata) = options.metadata {
            self.connections.set_metadata(metadata);
        }

        let Some(engine) = self.connections.create_engine(None, true)? else {
            debug!("Initialized without an engine");
            return Ok(self);
        };

        if options.bootstrap {
            self.connections.bootstrap(None).await?;
        }

        let scoped = options.scoped || self.scoped_default;
        self.factory = Some(if scoped {
            let factory = match options.scope_fn {
                Some(scope_fn) => ScopedFactory::with_scope_fn(engine, move || scope_fn()),
                None => ScopedFactory::new(engine),
            };
            SessionFactory::Scoped(factory)
        } else {
            SessionFactory::Plain(PlainFactory::new(engine))
        });
        self.scoped_default = scoped;
        info!(scoped = scoped, bootstrap = options.bootstrap, "Session manager initialized");

        if options.create_session && !scoped {
            self.create_session(true)?;
        }
        Ok(self)
    }

    /// Get a session.
    ///
    /// In scoped mode this returns the factory itself. In plain mode with `persist`
    /// the persisted session is returned, created first if needed; without
    /// `persist` a new unstored session is returned every time.
    pub fn create_session(&mut self, persist: bool) -> DbResult<SessionHandle> {
        let factory = self
            .factory
            .as_ref()
            .ok_or_else(|| DbError::uninitialized("No session factory has been configured"))?;

        let plain = match factory {
            SessionFactory::Scoped(scoped) => return Ok(SessionHandle::Scoped(scoped.clone())),
            SessionFactory::Plain(plain) => plain,
        };

        if !persist {
            return Ok(SessionHandle::Plain(plain.create()));
        }
        let session = self.session.get_or_insert_with(|| {
            let session = plain.create();
            info!(session_id = %session.id(), "Persisted session created");
            session
        });
        Ok(SessionHandle::Plain(session.clone()))
    }

    /// Close a session.
    ///
    /// An explicit session is closed on its own. Otherwise scoped mode tears down
    /// the current context's session and plain mode closes and clears the
    /// persisted session.
    pub fn close_session(&mut self, session: Option<&Session>) {
        if let Some(session) = session {
            session.close();
            return;
        }
        if let Some(SessionFactory::Scoped(factory)) = &self.factory {
            factory.remove();
            return;
        }
        if let Some(session) = self.session.take() {
            session.close();
            info!(session_id = %session.id(), "Persisted session closed");
        }
    }

    fn resolve(&self, session: Option<&Session>, operation: &str) -> DbResult<Session> {
        session
            .or(self.session.as_ref())
            .cloned()
            .ok_or_else(|| DbError::no_session(operation))
    }

    /// Stage an insert, committing immediately if `commit` is set.
    pub async fn add(
        &self,
        record: Record,
        session: Option<&Session>,
        commit: bool,
    ) -> DbResult<&Self> {
        let target = self.resolve(session, "add")?;
        target.add(record)?;
        if commit {
            target.commit().await?;
        }
        Ok(self)
    }

    /// Stage a delete, committing immediately if `commit` is set.
    pub async fn delete(
        &self,
        record: Record,
        session: Option<&Session>,
        commit: bool,
    ) -> DbResult<&Self> {
        let target = self.resolve(session, "delete")?;
        target.delete(record)?;
        if commit {
            target.commit().await?;
        }
        Ok(self)
    }

    pub async fn commit(&self, session: Option<&Session>) -> DbResult<&Self> {
        self.resolve(session, "commit")?.commit().await?;
        Ok(self)
    }

    pub fn rollback(&self, session: Option<&Session>) -> DbResult<&Self> {
        self.resolve(session, "rollback")?.rollback();
        Ok(self)
    }

    /// Query `model` with an equality filter per `(column, value)` pair.
    ///
    /// Runs on the persisted session in plain mode and on the current context's
    /// session in scoped mode. A filter naming an undeclared column fails with an
    /// attribute error.
    pub fn query<I, K, V>(&self, model: &Arc<Table>, filters: I) -> DbResult<FilteredQuery>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<SqlValue>,
    {
        let session = match &self.factory {
            Some(SessionFactory::Scoped(factory)) => factory.session(),
            _ => self.resolve(None, "query")?,
        };
        filters
            .into_iter()
            .try_fold(session.query(model), |query, (column, value)| {
                query.filter_eq(column.as_ref(), value)
            })
    }
}
