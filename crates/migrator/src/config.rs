use std::{path::PathBuf, time::Duration};

use clap::{builder::BoolishValueParser, ArgAction, Parser, ValueEnum};
use migrator_core::{
    ConfigSource, ConnectionConfig, ConnectionTemplate, ProbePolicy, SqlxEngine, StartupGate,
    DEFAULT_MIGRATIONS_DIR, DEFAULT_SECRET_ENV,
};

/// Which configuration strategy to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Profile {
    /// Literal connection parameters (local development database).
    Local,
    /// Password from a JSON secret in an environment variable.
    Secret,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WaitMode {
    None,
    Fixed,
    Probe,
}

/// Migrator configuration.
///
/// Read from the environment only. Connection overrides apply on top of the profile's defaults.
#[derive(Parser, Clone)]
pub struct MigratorConfig {
    #[arg(long, env = "MIGRATOR_PROFILE", value_enum, default_value_t = Profile::Local)]
    pub profile: Profile,

    /// Environment variable holding the JSON secret (`secret` profile).
    #[arg(long, env = "MIGRATOR_SECRET_ENV", default_value = DEFAULT_SECRET_ENV)]
    pub secret_env: String,

    #[arg(long, env = "DB_HOST")]
    pub db_host: Option<String>,

    #[arg(long, env = "DB_PORT")]
    pub db_port: Option<u16>,

    #[arg(long, env = "DB_NAME")]
    pub db_name: Option<String>,

    #[arg(long, env = "DB_USER")]
    pub db_user: Option<String>,

    /// Password for the `local` profile. Ignored by the `secret` profile.
    #[arg(long, env = "DB_PASSWORD")]
    pub db_password: Option<String>,

    #[arg(long, env = "MIGRATIONS_DIR", default_value = DEFAULT_MIGRATIONS_DIR)]
    pub migrations_dir: PathBuf,

    /// Tolerate versions recorded in the database that have no script on disk.
    /// Accepts `true`/`false`, `1`/`0`, `yes`/`no`, `on`/`off`.
    #[arg(
        long,
        env = "MIGRATIONS_IGNORE_MISSING",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
        default_value_t = false
    )]
    pub ignore_missing: bool,

    /// How long `migrate`/`info` keep retrying a refused connection.
    #[arg(long, env = "DB_CONNECT_TIMEOUT_MS", default_value_t = 10_000)]
    pub db_connect_timeout_ms: u64,

    #[arg(long, env = "MIGRATOR_WAIT", value_enum, default_value_t = WaitMode::Fixed)]
    pub wait: WaitMode,

    #[arg(long, env = "STARTUP_DELAY_MS", default_value_t = 5_000)]
    pub startup_delay_ms: u64,

    #[arg(long, env = "PROBE_MAX_ATTEMPTS", default_value_t = 10)]
    pub probe_max_attempts: u32,

    #[arg(long, env = "PROBE_INITIAL_BACKOFF_MS", default_value_t = 250)]
    pub probe_initial_backoff_ms: u64,

    #[arg(long, env = "PROBE_MAX_BACKOFF_MS", default_value_t = 5_000)]
    pub probe_max_backoff_ms: u64,
}

impl std::fmt::Debug for MigratorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let db_password = self.db_password.as_deref().map(|_| "<redacted>");
        f.debug_struct("MigratorConfig")
            .field("profile", &self.profile)
            .field("secret_env", &self.secret_env)
            .field("db_host", &self.db_host)
            .field("db_port", &self.db_port)
            .field("db_name", &self.db_name)
            .field("db_user", &self.db_user)
            .field("db_password", &db_password)
            .field("migrations_dir", &self.migrations_dir)
            .field("ignore_missing", &self.ignore_missing)
            .field("db_connect_timeout_ms", &self.db_connect_timeout_ms)
            .field("wait", &self.wait)
            .field("startup_delay_ms", &self.startup_delay_ms)
            .field("probe_max_attempts", &self.probe_max_attempts)
            .field("probe_initial_backoff_ms", &self.probe_initial_backoff_ms)
            .field("probe_max_backoff_ms", &self.probe_max_backoff_ms)
            .finish()
    }
}

impl MigratorConfig {
    /// Parse config from environment only (no CLI parsing).
    ///
    /// A single fake argv element keeps clap away from the subcommand arguments.
    pub fn from_env() -> Result<Self, clap::Error> {
        Self::try_parse_from(["migrator"])
    }

    pub fn config_source(&self) -> ConfigSource {
        match self.profile {
            Profile::Local => {
                let mut cfg = ConnectionConfig::local();
                self.apply_overrides(
                    &mut cfg.host,
                    &mut cfg.port,
                    &mut cfg.database,
                    &mut cfg.username,
                );
                if let Some(password) = &self.db_password {
                    cfg.password = password.clone();
                }
                ConfigSource::Literal(cfg)
            }
            Profile::Secret => {
                let mut template = ConnectionTemplate::default();
                self.apply_overrides(
                    &mut template.host,
                    &mut template.port,
                    &mut template.database,
                    &mut template.username,
                );
                ConfigSource::secret(self.secret_env.clone(), template)
            }
        }
    }

    pub fn startup_gate(&self) -> StartupGate {
        match self.wait {
            WaitMode::None => StartupGate::None,
            WaitMode::Fixed => {
                StartupGate::FixedDelay(Duration::from_millis(self.startup_delay_ms))
            }
            WaitMode::Probe => StartupGate::Probe(ProbePolicy {
                max_attempts: self.probe_max_attempts,
                initial_backoff: Duration::from_millis(self.probe_initial_backoff_ms),
                max_backoff: Duration::from_millis(self.probe_max_backoff_ms),
            }),
        }
    }

    pub fn engine(&self) -> SqlxEngine {
        SqlxEngine::new(self.migrations_dir.clone())
            .ignore_missing(self.ignore_missing)
            .connect_timeout(Duration::from_millis(self.db_connect_timeout_ms))
    }

    fn apply_overrides(
        &self,
        host: &mut String,
        port: &mut u16,
        database: &mut String,
        username: &mut String,
    ) {
        if let Some(v) = &self.db_host {
            *host = v.clone();
        }
        if let Some(v) = self.db_port {
            *port = v;
        }
        if let Some(v) = &self.db_name {
            *database = v.clone();
        }
        if let Some(v) = &self.db_user {
            *username = v.clone();
        }
    }
}
