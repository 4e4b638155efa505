//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Dialect-specific rendering of portable types and expressions
//! - Engine creation and connection pool management
//! - Schema apply and drop with lifecycle hooks
//! - View DDL generation
//! - Sessions, session factories and the session manager
//! - Statement execution and row decoding
//! - Database dispatch macros for reducing code duplication

pub mod bootstrap;
pub mod dialect;
pub mod executor;
#[macro_use]
pub mod macros;
pub mod manager;
pub mod params;
pub mod pool;
pub mod session;
pub mod types;
pub mod view;

pub use bootstrap::{BootstrapReport, SchemaBootstrapper};
pub use dialect::{DEFAULT_STRING_LENGTH, Dialect, PortableExpr};
pub use executor::QueryExecutor;
pub use manager::{InitializeOptions, SessionManager};
pub use pool::{ConnectionManager, DbPool, Engine};
pub use session::{
    FilteredQuery, PlainFactory, ScopeKey, ScopedFactory, Session, SessionFactory, SessionHandle,
    with_scope,
};
pub use view::{CreateView, DropView, ViewDefinition, create_view};
