//! Migration to create the mappings table.
//!
//! A mapping binds one CalDAV calendar to one Google calendar together with
//! its sync direction, window, interval and optional webhook target.

use sea_orm_migration::prelude::*;

use crate::m2025_06_01_000001_create_caldav_accounts::CaldavAccounts;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Mappings::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Mappings::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Mappings::CaldavAccountId).uuid().not_null())
                    .col(ColumnDef::new(Mappings::CaldavCalendarId).text().not_null())
                    .col(
                        ColumnDef::new(Mappings::CaldavCalendarName)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Mappings::GoogleCalendarId).text().not_null())
                    .col(
                        ColumnDef::new(Mappings::GoogleCalendarName)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Mappings::SyncDirection)
                            .text()
                            .not_null()
                            .default("caldav_to_google"),
                    )
                    .col(
                        ColumnDef::new(Mappings::SyncWindowDays)
                            .integer()
                            .not_null()
                            .default(30),
                    )
                    .col(
                        ColumnDef::new(Mappings::SyncIntervalMinutes)
                            .integer()
                            .not_null()
                            .default(5),
                    )
                    .col(ColumnDef::new(Mappings::WebhookUrl).text().null())
                    .col(
                        ColumnDef::new(Mappings::Enabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Mappings::LastSyncAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Mappings::LastSyncStatus).text().null())
                    .col(
                        ColumnDef::new(Mappings::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Mappings::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_mappings_caldav_account_id")
                            .from(Mappings::Table, Mappings::CaldavAccountId)
                            .to(CaldavAccounts::Table, CaldavAccounts::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_mappings_account_calendar")
                    .table(Mappings::Table)
                    .col(Mappings::CaldavAccountId)
                    .col(Mappings::CaldavCalendarId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_mappings_enabled")
                    .table(Mappings::Table)
                    .col(Mappings::Enabled)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_mappings_account_calendar").to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_mappings_enabled").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Mappings::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Mappings {
    Table,
    Id,
    CaldavAccountId,
    CaldavCalendarId,
    CaldavCalendarName,
    GoogleCalendarId,
    GoogleCalendarName,
    SyncDirection,
    SyncWindowDays,
    SyncIntervalMinutes,
    WebhookUrl,
    Enabled,
    LastSyncAt,
    LastSyncStatus,
    CreatedAt,
    UpdatedAt,
}
