//! DB Session Manager Library
//!
//! This library manages engine and session lifecycles over SQL databases
//! (SQLite, PostgreSQL, MySQL), bootstraps a declared schema, and renders
//! portable DDL, including views, for several SQL dialects.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::Config;
pub use db::{Dialect, SessionManager};
pub use error::{DbError, DbResult};
