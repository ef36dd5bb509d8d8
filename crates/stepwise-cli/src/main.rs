mod cli;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use stepwise_common::Direction;
use stepwise_config::{ConfigLoader, MigrateSettings};
use stepwise_core::{
    EventHook, MigrateOptions, MigrationEvent, MigrationSource, Migrator, MissedPolicy,
    ScriptLoader, create_migration, parse_sequence_number,
};
use stepwise_db::{Database, SqliteStateStore};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("  error : {e:#}");
            if e
                .downcast_ref::<stepwise_common::Error>()
                .is_some_and(|e| e.is_corrupted_state())
            {
                eprintln!("  error : The database may be in a corrupted state!");
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    if let Some(dir) = &cli.chdir {
        std::env::set_current_dir(dir)
            .with_context(|| format!("failed to change directory to {}", dir.display()))?;
    }

    let settings = resolve_settings(&cli)?;
    match cli.command() {
        Command::Create { title } => {
            let path = create_migration(&settings.migrations_dir, &title, &settings.extension)?;
            println!("  create : {}", path.display());
            Ok(())
        }
        Command::Up { target } => migrate(&cli, &settings, Direction::Up, target.as_deref()).await,
        Command::Down { target } => {
            migrate(&cli, &settings, Direction::Down, target.as_deref()).await
        }
    }
}

/// Config-file settings with command-line overrides applied.
fn resolve_settings(cli: &Cli) -> Result<MigrateSettings> {
    let mut settings = ConfigLoader::load_settings(&cli.config)?;
    if let Some(dir) = &cli.migrations_dir {
        settings.migrations_dir = dir.clone();
    }
    if let Some(ext) = &cli.extension {
        settings.extension = ext.clone();
    }
    debug!(
        "migrations in {} with extension {}",
        settings.migrations_dir.display(),
        settings.extension
    );
    Ok(settings)
}

async fn migrate(
    cli: &Cli,
    settings: &MigrateSettings,
    direction: Direction,
    target: Option<&str>,
) -> Result<()> {
    let target = target.map(parse_sequence_number).transpose()?;

    let db_config = ConfigLoader::resolve(cli.db_config.as_deref(), &cli.config, &cli.db_property)?;
    info!("connecting to {}", db_config.describe());
    let path: PathBuf = db_config.sqlite_path()?;
    let db = Database::open(&path)?;
    let store = SqliteStateStore::new(db.clone())?;

    let source = MigrationSource::new(&settings.migrations_dir, &settings.extension)?;
    let migrator = Migrator::new(source, &db, &store, &ScriptLoader).with_hook(progress_hook());

    let policy = if cli.allow_pending {
        MissedPolicy::IgnorePending
    } else {
        MissedPolicy::Strict
    };
    let options = MigrateOptions {
        direction,
        target,
        policy,
    };

    let report = migrator.run(options).await?;
    debug!("{} migrations run {direction}", report.processed.len());
    Ok(())
}

/// Prints one line per migration and a final line once state is saved.
fn progress_hook() -> EventHook {
    Arc::new(|event: &MigrationEvent| match event {
        MigrationEvent::Starting {
            direction, title, ..
        } => println!("  {direction} : {title}"),
        MigrationEvent::Compensating {
            direction, title, ..
        } => println!("  {direction} : {title} (reverting)"),
        MigrationEvent::Saved => println!("  migration : complete"),
        _ => {}
    })
}
