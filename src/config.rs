//! Configuration handling for the session manager.
//!
//! This module provides pool configuration shared by the library and the CLI
//! configuration parsed from command line arguments and environment variables.

use crate::db::Dialect;
use clap::{Parser, Subcommand};

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MAX_CONNECTIONS_SQLITE: u32 = 1;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Connection pool configuration, passed through to the engine.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PoolOptions {
    /// Maximum connections in pool (default: 10 for MySQL/PostgreSQL, 1 for SQLite)
    pub max_connections: Option<u32>,
    /// Minimum connections in pool (default: 1)
    pub min_connections: Option<u32>,
    /// Idle timeout in seconds (default: 600)
    pub idle_timeout_secs: Option<u64>,
    /// Connection acquire timeout in seconds (default: 30)
    pub acquire_timeout_secs: Option<u64>,
    /// Whether to test connections before use (default: true)
    pub test_before_acquire: Option<bool>,
}

impl PoolOptions {
    /// Get max_connections with default value based on database type.
    pub fn max_connections_or_default(&self, is_sqlite: bool) -> u32 {
        self.max_connections.unwrap_or(if is_sqlite {
            DEFAULT_MAX_CONNECTIONS_SQLITE
        } else {
            DEFAULT_MAX_CONNECTIONS
        })
    }

    /// Get min_connections with default value.
    pub fn min_connections_or_default(&self) -> u32 {
        self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS)
    }

    /// Get idle_timeout with default value.
    pub fn idle_timeout_or_default(&self) -> u64 {
        self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS)
    }

    /// Get acquire_timeout with default value.
    pub fn acquire_timeout_or_default(&self) -> u64 {
        self.acquire_timeout_secs
            .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS)
    }

    /// Get test_before_acquire with default value.
    pub fn test_before_acquire_or_default(&self) -> bool {
        self.test_before_acquire.unwrap_or(true)
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(max) = self.max_connections {
            if max == 0 {
                return Err("max_connections must be greater than 0".to_string());
            }
        }
        if let Some(min) = self.min_connections {
            if let Some(max) = self.max_connections {
                if min > max {
                    return Err(format!(
                        "min_connections ({}) cannot exceed max_connections ({})",
                        min, max
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Command line configuration.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "db-session-manager",
    about = "Bootstrap the file ledger schema and render portable DDL",
    version,
    author
)]
pub struct Config {
    /// Database connection descriptor, e.g. "sqlite:ledger.db?mode=rwc"
    #[arg(short = 'd', long = "database", value_name = "URL", env = "DATABASE_URL")]
    pub database: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "DBSM_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DBSM_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Print the DDL of the ledger schema for a dialect without connecting
    Ddl {
        /// Target dialect (default, postgresql, mysql, mssql, oracle, sqlite)
        #[arg(long, default_value = "default")]
        dialect: Dialect,

        /// Print the drop statements instead of the create statements
        #[arg(long)]
        drop: bool,
    },
    /// Create the ledger schema on the configured database
    Bootstrap {
        /// Configure scoped (per-context) sessions
        #[arg(long)]
        scoped: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_defaults() {
        let opts = PoolOptions::default();
        assert_eq!(opts.max_connections_or_default(true), 1);
        assert_eq!(opts.max_connections_or_default(false), 10);
        assert_eq!(opts.min_connections_or_default(), 1);
        assert!(opts.test_before_acquire_or_default());
    }

    #[test]
    fn test_pool_validation() {
        let opts = PoolOptions {
            max_connections: Some(0),
            ..Default::default()
        };
        assert!(opts.validate().is_err());

        let opts = PoolOptions {
            max_connections: Some(2),
            min_connections: Some(3),
            ..Default::default()
        };
        assert!(opts.validate().is_err());

        let opts = PoolOptions {
            max_connections: Some(4),
            min_connections: Some(0),
            ..Default::default()
        };
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_cli_parses_ddl_command() {
        let config =
            Config::try_parse_from(["db-session-manager", "ddl", "--dialect", "postgresql"])
                .unwrap();
        match config.command {
            Command::Ddl { dialect, drop } => {
                assert_eq!(dialect, Dialect::PostgreSQL);
                assert!(!drop);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_parses_bootstrap_command() {
        let config = Config::try_parse_from([
            "db-session-manager",
            "--database",
            "sqlite:ledger.db",
            "bootstrap",
            "--scoped",
        ])
        .unwrap();
        assert_eq!(config.database.as_deref(), Some("sqlite:ledger.db"));
        assert!(matches!(config.command, Command::Bootstrap { scoped: true }));
    }
}
