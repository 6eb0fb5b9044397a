//! Migration to create the sync_logs table.
//!
//! Audit record of one sync run: counters, error list, timing and webhook
//! delivery state. A row is inserted as `running` and finalized in place.

use sea_orm_migration::prelude::*;

use crate::m2025_06_01_000003_create_mappings::Mappings;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncLogs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SyncLogs::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(SyncLogs::MappingId).uuid().not_null())
                    .col(ColumnDef::new(SyncLogs::Direction).text().not_null())
                    .col(ColumnDef::new(SyncLogs::Status).text().not_null())
                    .col(
                        ColumnDef::new(SyncLogs::InsertedCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncLogs::UpdatedCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncLogs::DeletedCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncLogs::ErrorCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(SyncLogs::ErrorMessage).text().null())
                    .col(ColumnDef::new(SyncLogs::EventSummaries).json_binary().null())
                    .col(ColumnDef::new(SyncLogs::ChangeSummary).text().null())
                    .col(
                        ColumnDef::new(SyncLogs::WebhookSent)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(SyncLogs::WebhookStatus).text().null())
                    .col(
                        ColumnDef::new(SyncLogs::StartedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncLogs::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(SyncLogs::DurationSeconds).big_integer().null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sync_logs_mapping_id")
                            .from(SyncLogs::Table, SyncLogs::MappingId)
                            .to(Mappings::Table, Mappings::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_logs_mapping_started")
                    .table(SyncLogs::Table)
                    .col(SyncLogs::MappingId)
                    .col(SyncLogs::StartedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_logs_status_started")
                    .table(SyncLogs::Table)
                    .col(SyncLogs::Status)
                    .col(SyncLogs::StartedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_sync_logs_mapping_started").to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_sync_logs_status_started").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(SyncLogs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum SyncLogs {
    Table,
    Id,
    MappingId,
    Direction,
    Status,
    InsertedCount,
    UpdatedCount,
    DeletedCount,
    ErrorCount,
    ErrorMessage,
    EventSummaries,
    ChangeSummary,
    WebhookSent,
    WebhookStatus,
    StartedAt,
    CompletedAt,
    DurationSeconds,
}
