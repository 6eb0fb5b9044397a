//! # CalDAV Sync Service Entry Point

use std::sync::Arc;

use caldav_sync::caldav::{CalDavAdapter, HttpCalDavClient};
use caldav_sync::config::{AppConfig, ConfigLoader};
use caldav_sync::db;
use caldav_sync::google::{
    AccessTokenProvider, GoogleAdapter, GoogleCalendarClient, OAuthTokenProvider,
};
use caldav_sync::repositories::account::AccountRepository;
use caldav_sync::repositories::credential::CredentialRepository;
use caldav_sync::repositories::mapping::MappingRepository;
use caldav_sync::repositories::sync_log::SyncLogRepository;
use caldav_sync::repositories::webhook_retry::WebhookRetryRepository;
use caldav_sync::sync::clock::{Clock, SystemClock};
use caldav_sync::sync::engine::SyncEngine;
use caldav_sync::sync::scheduler::SyncScheduler;
use caldav_sync::sync::webhook::{WebhookPipeline, WebhookRetryProcessor};
use caldav_sync::telemetry;
use clap::{Parser, Subcommand};
use migration::{Migrator, MigratorTrait};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "caldav-sync")]
#[command(about = "CalDAV to Google Calendar synchronization service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
    /// Run the scheduler and webhook retry processor until interrupted
    Run,
    /// Execute one sync run for a single mapping, then exit
    SyncOnce {
        /// Mapping id to sync
        mapping_id: Uuid,
    },
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Apply all pending migrations
    Up,
    /// Rollback the last migration
    Down,
    /// Show migration status
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    let config = ConfigLoader::new().load()?;
    telemetry::init_tracing(&config);

    // Configuration errors are fatal; the process refuses to start
    config.validate()?;

    let db = db::init_pool(&config).await?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Migrate { action } => handle_migrate_command(&db, action).await,
        Commands::Run => {
            prepare_database(&config, &db).await?;
            run_service(config, db).await
        }
        Commands::SyncOnce { mapping_id } => {
            prepare_database(&config, &db).await?;
            run_sync_once(config, db, mapping_id).await
        }
    }
}

/// Apply migrations automatically for local and test profiles.
async fn prepare_database(
    config: &AppConfig,
    db: &DatabaseConnection,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if config.profile == "local" || config.profile == "test" {
        info!(profile = %config.profile, "running migrations automatically");
        Migrator::up(db, None).await?;
    }
    Ok(())
}

struct Services {
    engine: Arc<SyncEngine>,
    pipeline: Arc<WebhookPipeline>,
    mappings: MappingRepository,
    sync_logs: SyncLogRepository,
    sync_config: caldav_sync::config::SyncConfig,
}

/// Wire the dependency bundle: adapters, credential provider, repositories,
/// webhook pipeline and the engine itself.
fn build_services(
    config: &AppConfig,
    db: DatabaseConnection,
) -> Result<Services, Box<dyn std::error::Error + Send + Sync>> {
    let db = Arc::new(db);
    let crypto_key = config.crypto_key()?;

    let accounts = AccountRepository::new(db.clone(), crypto_key.clone());
    let credentials = CredentialRepository::new(db.clone(), crypto_key);
    let sync_logs = SyncLogRepository::new(db.clone());
    let retries = WebhookRetryRepository::new(db.clone());
    let mappings = MappingRepository::new(db.clone());

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let caldav: Arc<dyn CalDavAdapter> = Arc::new(HttpCalDavClient::new(&config.caldav)?);
    let tokens: Arc<dyn AccessTokenProvider> = Arc::new(OAuthTokenProvider::new(
        config.google.clone(),
        credentials,
    ));
    let google: Arc<dyn GoogleAdapter> =
        Arc::new(GoogleCalendarClient::new(config.google.clone(), tokens.clone())?);

    let pipeline = Arc::new(WebhookPipeline::new(
        config.webhooks.clone(),
        clock.clone(),
        sync_logs.clone(),
        retries,
    ));

    let engine = Arc::new(SyncEngine::new(
        caldav,
        google,
        tokens,
        pipeline.clone(),
        clock,
        db,
        accounts,
    ));

    Ok(Services {
        engine,
        pipeline,
        mappings,
        sync_logs,
        sync_config: config.sync.clone(),
    })
}

async fn run_service(
    config: AppConfig,
    db: DatabaseConnection,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if let Ok(redacted) = config.redacted_json() {
        info!(profile = %config.profile, "loaded configuration: {redacted}");
    }

    let services = build_services(&config, db)?;
    let shutdown = CancellationToken::new();

    let scheduler = SyncScheduler::new(
        services.engine.clone(),
        services.mappings.clone(),
        services.sync_config.clone(),
    );
    let scheduled = scheduler.start().await?;
    info!(scheduled, "sync scheduler started");

    let processor = WebhookRetryProcessor::new(services.pipeline.clone());
    let processor_handle = tokio::spawn(processor.run(shutdown.child_token()));

    let retention_handle = tokio::spawn(retention_sweep(
        services.sync_logs.clone(),
        services.sync_config.sync_log_retention_days,
        shutdown.child_token(),
    ));

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, draining");

    shutdown.cancel();
    scheduler.shutdown().await;
    let _ = processor_handle.await;
    let _ = retention_handle.await;

    info!("service stopped");
    Ok(())
}

/// Daily sweep dropping sync log rows past the retention window.
async fn retention_sweep(
    sync_logs: SyncLogRepository,
    retention_days: i64,
    shutdown: CancellationToken,
) {
    let period = std::time::Duration::from_secs(24 * 60 * 60);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(period) => {}
        }
        match sync_logs.delete_older_than(retention_days).await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "swept old sync logs"),
            Err(e) => error!(error = %e, "sync log retention sweep failed"),
        }
    }
}

async fn run_sync_once(
    config: AppConfig,
    db: DatabaseConnection,
    mapping_id: Uuid,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let services = build_services(&config, db)?;

    let cancel = CancellationToken::new();
    let result = services.engine.sync(mapping_id, &cancel).await?;

    println!(
        "sync {} finished: {} ({} inserted, {} updated, {} deleted, {} errors)",
        mapping_id,
        result.status.as_str(),
        result.inserted,
        result.updated,
        result.deleted,
        result.errors,
    );
    if let Some(summary) = result.change_summary {
        println!("{summary}");
    }
    for message in &result.error_messages {
        eprintln!("error: {message}");
    }

    Ok(())
}

async fn handle_migrate_command(
    db: &DatabaseConnection,
    action: MigrateAction,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    match action {
        MigrateAction::Up => {
            println!("Applying migrations...");
            Migrator::up(db, None).await?;
            println!("All migrations applied successfully");
        }
        MigrateAction::Down => {
            println!("Rolling back last migration...");
            Migrator::down(db, Some(1)).await?;
            println!("Migration rolled back successfully");
        }
        MigrateAction::Status => {
            let applied = Migrator::get_applied_migrations(db).await?;
            let pending = Migrator::get_pending_migrations(db).await?;
            println!("Applied migrations: {}", applied.len());
            println!("Pending migrations: {}", pending.len());
        }
    }
    Ok(())
}
