use std::{
    io::{self, Write},
    process::ExitCode,
};

use clap::{Parser, Subcommand};
use migrator::config::MigratorConfig;
use migrator_core::{MigrationStatus, RunError, Runner, SqlxEngine};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "migrator")]
#[command(about = "Apply PostgreSQL schema migrations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Default)]
enum Command {
    /// Apply all pending migrations (default).
    #[default]
    Migrate,

    /// Print every known migration with its state.
    Info,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,migrator=debug,migrator_core=debug")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = match MigratorConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            tracing::error!(step = "load-config", error = %err, "invalid configuration");
            return ExitCode::from(2);
        }
    };
    tracing::debug!(config = ?cfg, "loaded config");

    let runner = Runner::new(cfg.config_source(), cfg.startup_gate(), cfg.engine());

    match cli.command.unwrap_or_default() {
        Command::Migrate => match runner.migrate().await {
            Ok(_) => ExitCode::SUCCESS,
            Err(err) => fail(err),
        },
        Command::Info => info(&runner).await,
    }
}

async fn info(runner: &Runner<SqlxEngine>) -> ExitCode {
    let status = match runner.info().await {
        Ok(status) => status,
        Err(err) => return fail(err),
    };

    if let Err(err) = print_status(&status) {
        tracing::error!(error = %err, "write migration status");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn print_status(status: &[MigrationStatus]) -> io::Result<()> {
    let mut out = io::stdout().lock();
    for s in status {
        writeln!(out, "{}\t{}\t{}", s.version, s.state, s.description)?;
    }
    out.flush()
}

fn fail(err: RunError) -> ExitCode {
    let code = err.exit_code();
    let step = err.step();
    tracing::error!(step, error = %format!("{:#}", anyhow::Error::new(err)), "migrator failed");
    ExitCode::from(code)
}
