//! Migration to create the webhook_retries table.
//!
//! Pending webhook delivery attempts with their serialized payload and the
//! next retry instant. Rows survive restarts and are processed by the retry
//! worker.

use sea_orm_migration::prelude::*;

use crate::m2025_06_01_000005_create_sync_logs::SyncLogs;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WebhookRetries::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WebhookRetries::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(WebhookRetries::SyncLogId).uuid().not_null())
                    .col(ColumnDef::new(WebhookRetries::WebhookUrl).text().not_null())
                    .col(
                        ColumnDef::new(WebhookRetries::Payload)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookRetries::AttemptCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(WebhookRetries::MaxAttempts)
                            .integer()
                            .not_null()
                            .default(3),
                    )
                    .col(
                        ColumnDef::new(WebhookRetries::NextRetryAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(WebhookRetries::LastError).text().null())
                    .col(
                        ColumnDef::new(WebhookRetries::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(WebhookRetries::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_webhook_retries_sync_log_id")
                            .from(WebhookRetries::Table, WebhookRetries::SyncLogId)
                            .to(SyncLogs::Table, SyncLogs::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_webhook_retries_next_retry")
                    .table(WebhookRetries::Table)
                    .col(WebhookRetries::NextRetryAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_webhook_retries_next_retry").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(WebhookRetries::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum WebhookRetries {
    Table,
    Id,
    SyncLogId,
    WebhookUrl,
    Payload,
    AttemptCount,
    MaxAttempts,
    NextRetryAt,
    LastError,
    CreatedAt,
    UpdatedAt,
}
