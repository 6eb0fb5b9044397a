//! Migration to create the event_mappings table.
//!
//! Per-event sync bookkeeping: ties a CalDAV UID to a Google event id within
//! one mapping, with last-seen timestamps on both sides and the content hash
//! of the side that was applied last.

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
                    .table(EventMappings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EventMappings::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(EventMappings::MappingId).uuid().not_null())
                    .col(ColumnDef::new(EventMappings::CaldavUid).text().not_null())
                    .col(ColumnDef::new(EventMappings::GoogleEventId).text().null())
                    .col(
                        ColumnDef::new(EventMappings::LastCaldavModified)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(EventMappings::LastGoogleUpdated)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(EventMappings::LastSyncDirection)
                            .text()
                            .null(),
                    )
                    .col(ColumnDef::new(EventMappings::ContentHash).text().null())
                    .col(
                        ColumnDef::new(EventMappings::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(EventMappings::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_event_mappings_mapping_id")
                            .from(EventMappings::Table, EventMappings::MappingId)
                            .to(Mappings::Table, Mappings::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One tracked row per (mapping, UID); the only cross-side identity link
        manager
            .create_index(
                Index::create()
                    .name("idx_event_mappings_mapping_uid")
                    .table(EventMappings::Table)
                    .col(EventMappings::MappingId)
                    .col(EventMappings::CaldavUid)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_event_mappings_google_id")
                    .table(EventMappings::Table)
                    .col(EventMappings::MappingId)
                    .col(EventMappings::GoogleEventId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_event_mappings_mapping_uid")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(Index::drop().name("idx_event_mappings_google_id").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(EventMappings::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum EventMappings {
    Table,
    Id,
    MappingId,
    CaldavUid,
    GoogleEventId,
    LastCaldavModified,
    LastGoogleUpdated,
    LastSyncDirection,
    ContentHash,
    CreatedAt,
    UpdatedAt,
}
