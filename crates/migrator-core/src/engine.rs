use std::{collections::HashSet, fmt, path::PathBuf, time::Duration};

use async_trait::async_trait;
use sqlx::{
    migrate::{AppliedMigration, Migrate, Migrator},
    postgres::{PgConnection, PgPool, PgPoolOptions},
    Connection,
};

use crate::{config::ConnectionConfig, error::EngineError};

pub const DEFAULT_MIGRATIONS_DIR: &str = "migrations";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Description shown for versions recorded in the database with no script on disk.
pub const UNKNOWN_DESCRIPTION: &str = "<unknown>";

/// Migrations applied by a single `migrate` call, in the order they ran.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub applied: Vec<MigrationSummary>,
}

impl MigrationReport {
    pub fn is_up_to_date(&self) -> bool {
        self.applied.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationSummary {
    pub version: i64,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    Applied,
    Pending,
    /// Recorded as applied, but the script on disk no longer matches its checksum.
    Modified,
    /// Recorded as applied, but no script on disk has this version.
    Missing,
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MigrationState::Applied => "applied",
            MigrationState::Pending => "pending",
            MigrationState::Modified => "modified",
            MigrationState::Missing => "missing",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub version: i64,
    pub description: String,
    pub state: MigrationState,
}

/// The external engine that owns migration discovery, ordering, locking and bookkeeping.
#[async_trait]
pub trait MigrationEngine: Send + Sync {
    /// Open a connection, ping, close. Used by the readiness probe.
    async fn ping(&self, cfg: &ConnectionConfig) -> Result<(), sqlx::Error>;

    /// Apply every pending migration.
    async fn migrate(&self, cfg: &ConnectionConfig) -> Result<MigrationReport, EngineError>;

    /// Compare scripts on disk with what the database has recorded. Does not write.
    async fn status(&self, cfg: &ConnectionConfig) -> Result<Vec<MigrationStatus>, EngineError>;
}

/// [`MigrationEngine`] backed by `sqlx::migrate`, reading scripts from a directory at runtime.
#[derive(Debug, Clone)]
pub struct SqlxEngine {
    migrations_dir: PathBuf,
    ignore_missing: bool,
    connect_timeout: Duration,
}

impl SqlxEngine {
    pub fn new(migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
            ignore_missing: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Don't fail when the database records versions that are no longer on disk.
    pub fn ignore_missing(mut self, ignore_missing: bool) -> Self {
        self.ignore_missing = ignore_missing;
        self
    }

    /// How long to keep retrying a refused connection before giving up.
    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    async fn load(&self) -> Result<Migrator, EngineError> {
        let mut migrator = Migrator::new(self.migrations_dir.as_path())
            .await
            .map_err(|source| EngineError::Load {
                dir: self.migrations_dir.display().to_string(),
                source,
            })?;
        migrator.ignore_missing = self.ignore_missing;
        Ok(migrator)
    }

    /// Single-connection pool; `Migrator::run` acquires through it.
    async fn connect(&self, cfg: &ConnectionConfig) -> Result<PgPool, EngineError> {
        PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(self.connect_timeout)
            .connect_with(cfg.connect_options())
            .await
            .map_err(|source| EngineError::Connect {
                url: cfg.redacted_url(),
                source,
            })
    }
}

/// Rows of the bookkeeping table, or nothing if sqlx hasn't created it yet.
async fn applied_migrations(pool: &PgPool) -> Result<Vec<AppliedMigration>, EngineError> {
    let exists: bool = sqlx::query_scalar("SELECT to_regclass('_sqlx_migrations') IS NOT NULL")
        .fetch_one(pool)
        .await
        .map_err(EngineError::Query)?;
    if !exists {
        return Ok(Vec::new());
    }

    let mut conn = pool.acquire().await.map_err(EngineError::Query)?;
    conn.list_applied_migrations()
        .await
        .map_err(EngineError::Migrate)
}

/// Up-migrations recorded in `after` that were not in `before`, in script order.
pub fn applied_between(
    migrator: &Migrator,
    before: &[AppliedMigration],
    after: &[AppliedMigration],
) -> Vec<MigrationSummary> {
    let before: HashSet<i64> = before.iter().map(|m| m.version).collect();
    let after: HashSet<i64> = after.iter().map(|m| m.version).collect();

    migrator
        .iter()
        .filter(|m| !m.migration_type.is_down_migration())
        .filter(|m| after.contains(&m.version) && !before.contains(&m.version))
        .map(|m| MigrationSummary {
            version: m.version,
            description: m.description.to_string(),
        })
        .collect()
}

/// State of every migration on disk or in the bookkeeping table, sorted by version.
pub fn classify(migrator: &Migrator, applied: &[AppliedMigration]) -> Vec<MigrationStatus> {
    let mut out: Vec<MigrationStatus> = migrator
        .iter()
        .filter(|m| !m.migration_type.is_down_migration())
        .map(|m| {
            let state = match applied.iter().find(|a| a.version == m.version) {
                Some(a) if a.checksum == m.checksum => MigrationState::Applied,
                Some(_) => MigrationState::Modified,
                None => MigrationState::Pending,
            };
            MigrationStatus {
                version: m.version,
                description: m.description.to_string(),
                state,
            }
        })
        .collect();

    for a in applied {
        if !out.iter().any(|s| s.version == a.version) {
            out.push(MigrationStatus {
                version: a.version,
                description: UNKNOWN_DESCRIPTION.to_string(),
                state: MigrationState::Missing,
            });
        }
    }

    out.sort_by_key(|s| s.version);
    out
}

#[async_trait]
impl MigrationEngine for SqlxEngine {
    async fn ping(&self, cfg: &ConnectionConfig) -> Result<(), sqlx::Error> {
        let mut conn = PgConnection::connect_with(&cfg.connect_options()).await?;
        conn.ping().await?;
        conn.close().await
    }

    async fn migrate(&self, cfg: &ConnectionConfig) -> Result<MigrationReport, EngineError> {
        let migrator = self.load().await?;
        tracing::debug!(
            dir = %self.migrations_dir.display(),
            scripts = migrator.iter().count(),
            "loaded migration scripts"
        );

        let pool = self.connect(cfg).await?;
        let before = applied_migrations(&pool).await?;

        migrator.run(&pool).await.map_err(EngineError::Migrate)?;

        let after = applied_migrations(&pool).await?;
        pool.close().await;

        Ok(MigrationReport {
            applied: applied_between(&migrator, &before, &after),
        })
    }

    async fn status(&self, cfg: &ConnectionConfig) -> Result<Vec<MigrationStatus>, EngineError> {
        let migrator = self.load().await?;
        let pool = self.connect(cfg).await?;
        let applied = applied_migrations(&pool).await?;
        pool.close().await;

        Ok(classify(&migrator, &applied))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    async fn migrator_with(scripts: &[(&str, &str)]) -> (tempfile::TempDir, Migrator) {
        let dir = tempfile::tempdir().unwrap();
        for (file, sql) in scripts {
            std::fs::write(dir.path().join(file), sql).unwrap();
        }
        let migrator = SqlxEngine::new(dir.path()).load().await.unwrap();
        (dir, migrator)
    }

    fn recorded(migrator: &Migrator, version: i64) -> AppliedMigration {
        let m = migrator.iter().find(|m| m.version == version).unwrap();
        AppliedMigration {
            version,
            checksum: m.checksum.clone(),
        }
    }

    fn states(status: &[MigrationStatus]) -> Vec<(i64, MigrationState)> {
        status.iter().map(|s| (s.version, s.state)).collect()
    }

    #[tokio::test]
    async fn classify_covers_every_state() {
        let (_dir, migrator) = migrator_with(&[
            ("0001_accounts.sql", "CREATE TABLE accounts (id INT);"),
            ("0002_email.sql", "ALTER TABLE accounts ADD COLUMN email TEXT;"),
            ("0003_index.sql", "CREATE INDEX ON accounts (email);"),
        ])
        .await;

        let applied = vec![
            recorded(&migrator, 1),
            AppliedMigration {
                version: 2,
                checksum: vec![0u8; 48].into(),
            },
            AppliedMigration {
                version: 7,
                checksum: vec![1u8; 48].into(),
            },
        ];

        let status = classify(&migrator, &applied);
        assert_eq!(
            states(&status),
            vec![
                (1, MigrationState::Applied),
                (2, MigrationState::Modified),
                (3, MigrationState::Pending),
                (7, MigrationState::Missing),
            ]
        );
        assert_eq!(status[0].description, "accounts");
        assert_eq!(status[3].description, "<unknown>");
    }

    #[tokio::test]
    async fn classify_fresh_database_is_all_pending() {
        let (_dir, migrator) = migrator_with(&[
            ("0002_second.sql", "SELECT 2;"),
            ("0001_first.sql", "SELECT 1;"),
        ])
        .await;

        let status = classify(&migrator, &[]);
        assert_eq!(
            states(&status),
            vec![(1, MigrationState::Pending), (2, MigrationState::Pending)]
        );
    }

    #[tokio::test]
    async fn applied_between_reports_only_new_versions() {
        let (_dir, migrator) = migrator_with(&[
            ("0001_first.sql", "SELECT 1;"),
            ("0002_second.sql", "SELECT 2;"),
        ])
        .await;
        let both = || vec![recorded(&migrator, 1), recorded(&migrator, 2)];

        let first_run = applied_between(&migrator, &[], &both());
        let versions: Vec<i64> = first_run.iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 2]);
        assert_eq!(first_run[1].description, "second");

        let second_run = applied_between(&migrator, &both(), &both());
        assert!(second_run.is_empty());
    }

    #[tokio::test]
    async fn missing_directory_is_a_load_error() {
        let engine = SqlxEngine::new(Path::new("/nonexistent/migrations/dir"));
        let err = engine.load().await.unwrap_err();
        assert!(matches!(err, EngineError::Load { .. }));
    }

    #[tokio::test]
    async fn migrate_against_unreachable_database_is_a_connect_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SqlxEngine::new(dir.path()).connect_timeout(Duration::from_millis(200));
        let cfg = ConnectionConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            ..ConnectionConfig::local()
        };

        let err = engine.migrate(&cfg).await.unwrap_err();
        match err {
            EngineError::Connect { url, .. } => {
                assert_eq!(url, "postgres://postgres@127.0.0.1:1/civil");
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = engine.status(&cfg).await.unwrap_err();
        assert!(matches!(err, EngineError::Connect { .. }));
    }

    #[test]
    fn states_render_lowercase() {
        assert_eq!(MigrationState::Modified.to_string(), "modified");
        assert_eq!(MigrationState::Pending.to_string(), "pending");
    }
}
