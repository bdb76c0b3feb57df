//! Core of the schema migration runner.
//!
//! Resolves PostgreSQL connection parameters (literal values, or a password taken from a JSON
//! secret in the environment), waits for the database, and hands the connection to the sqlx
//! migrator. Discovering, ordering, locking and recording migrations is the engine's job; this
//! crate only supplies the connection.

pub mod config;
pub mod engine;
pub mod error;
pub mod readiness;
pub mod runner;
pub mod secret;

pub use config::{ConfigSource, ConnectionConfig, ConnectionTemplate, DEFAULT_SECRET_ENV};
pub use engine::{
    MigrationEngine, MigrationReport, MigrationState, MigrationStatus, MigrationSummary,
    SqlxEngine, DEFAULT_MIGRATIONS_DIR,
};
pub use error::{ConfigError, DependencyTimeout, EngineError, RunError};
pub use readiness::{ProbePolicy, StartupGate};
pub use runner::Runner;
