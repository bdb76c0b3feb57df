use crate::{
    config::{ConfigSource, ConnectionConfig},
    engine::{MigrationEngine, MigrationReport, MigrationStatus},
    error::RunError,
    readiness::{self, StartupGate},
};

/// One run of the tool: startup gate, configuration, then the engine.
pub struct Runner<E> {
    source: ConfigSource,
    gate: StartupGate,
    engine: E,
}

impl<E: MigrationEngine> Runner<E> {
    pub fn new(source: ConfigSource, gate: StartupGate, engine: E) -> Self {
        Self {
            source,
            gate,
            engine,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Apply all pending migrations.
    pub async fn migrate(&self) -> Result<MigrationReport, RunError> {
        let cfg = self.prepare().await?;

        tracing::info!(url = %cfg.redacted_url(), "applying migrations");
        let report = self.engine.migrate(&cfg).await?;

        for m in &report.applied {
            tracing::info!(version = m.version, description = %m.description, "migration applied");
        }
        if report.is_up_to_date() {
            tracing::info!("schema already up to date");
        } else {
            tracing::info!(applied = report.applied.len(), "migrations finished");
        }
        Ok(report)
    }

    /// Report the state of every known migration.
    pub async fn info(&self) -> Result<Vec<MigrationStatus>, RunError> {
        let cfg = self.prepare().await?;
        tracing::info!(url = %cfg.redacted_url(), "reading migration status");
        Ok(self.engine.status(&cfg).await?)
    }

    /// Wait for the database and resolve configuration.
    ///
    /// The fixed delay runs before resolution; the probe needs the resolved config, so it runs
    /// after.
    async fn prepare(&self) -> Result<ConnectionConfig, RunError> {
        match &self.gate {
            StartupGate::None => self.resolve(),
            StartupGate::FixedDelay(delay) => {
                tracing::debug!(delay_ms = delay.as_millis() as u64, "startup delay");
                readiness::fixed_delay(*delay).await;
                self.resolve()
            }
            StartupGate::Probe(policy) => {
                let cfg = self.resolve()?;
                let (engine, target) = (&self.engine, &cfg);
                let attempts =
                    readiness::wait_until_ready(policy, move || engine.ping(target)).await?;
                tracing::debug!(attempts, "database ready");
                Ok(cfg)
            }
        }
    }

    fn resolve(&self) -> Result<ConnectionConfig, RunError> {
        let cfg = self.source.resolve()?;
        tracing::debug!(config = ?cfg, "resolved connection config");
        Ok(cfg)
    }
}
