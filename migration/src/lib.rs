//! Database migrations for the CalDAV sync service.
//!
//! One migration per table, applied in dependency order.

pub use sea_orm_migration::prelude::*;

mod m2025_06_01_000001_create_caldav_accounts;
mod m2025_06_01_000002_create_oauth_credentials;
mod m2025_06_01_000003_create_mappings;
mod m2025_06_01_000004_create_event_mappings;
mod m2025_06_01_000005_create_sync_logs;
mod m2025_06_01_000006_create_webhook_retries;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_06_01_000001_create_caldav_accounts::Migration),
            Box::new(m2025_06_01_000002_create_oauth_credentials::Migration),
            Box::new(m2025_06_01_000003_create_mappings::Migration),
            Box::new(m2025_06_01_000004_create_event_mappings::Migration),
            Box::new(m2025_06_01_000005_create_sync_logs::Migration),
            Box::new(m2025_06_01_000006_create_webhook_retries::Migration),
        ]
    }
}
