use sqlx::migrate::MigrateError;
use thiserror::Error;

/// Failure to produce a [`crate::ConnectionConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {name} is not set")]
    MissingEnvironmentVariable { name: String },

    #[error("secret in {name} is malformed: {reason}")]
    MalformedSecret { name: String, reason: String },

    #[error("secret in {name} has no `{field}` field")]
    MissingField { name: String, field: &'static str },
}

/// The readiness probe never reached the database.
#[derive(Debug, Error)]
#[error("database not ready after {attempts} attempts")]
pub struct DependencyTimeout {
    pub attempts: u32,
    #[source]
    pub last_error: sqlx::Error,
}

/// Anything raised by the migration engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("connect to {url}")]
    Connect {
        url: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("load migration scripts from {dir}")]
    Load {
        dir: String,
        #[source]
        source: MigrateError,
    },

    #[error("apply migrations")]
    Migrate(#[source] MigrateError),

    #[error("read migration history")]
    Query(#[source] sqlx::Error),
}

/// Top-level failure of a run, tagged with the step that failed.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    DependencyTimeout(#[from] DependencyTimeout),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl RunError {
    pub fn step(&self) -> &'static str {
        match self {
            RunError::Config(_) => "resolve-config",
            RunError::DependencyTimeout(_) => "wait-for-database",
            RunError::Engine(_) => "migrate",
        }
    }

    /// Process exit code for this failure: 2 config, 3 dependency timeout, 4 engine.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::Config(_) => 2,
            RunError::DependencyTimeout(_) => 3,
            RunError::Engine(_) => 4,
        }
    }
}
