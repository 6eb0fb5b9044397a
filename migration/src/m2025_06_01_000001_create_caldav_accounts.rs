//! Migration to create the caldav_accounts table.
//!
//! Stores credentials and connection settings for one CalDAV endpoint. The
//! password is held as AES-256-GCM ciphertext, never plaintext.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CaldavAccounts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CaldavAccounts::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CaldavAccounts::Name).text().not_null())
                    .col(ColumnDef::new(CaldavAccounts::Username).text().not_null())
                    .col(
                        ColumnDef::new(CaldavAccounts::PasswordCiphertext)
                            .binary()
                            .not_null(),
                    )
                    .col(ColumnDef::new(CaldavAccounts::BaseUrl).text().not_null())
                    .col(
                        ColumnDef::new(CaldavAccounts::VerifyTls)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(CaldavAccounts::Enabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(CaldavAccounts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(CaldavAccounts::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Display names are unique so mappings can reference accounts unambiguously
        manager
            .create_index(
                Index::create()
                    .name("idx_caldav_accounts_name")
                    .table(CaldavAccounts::Table)
                    .col(CaldavAccounts::Name)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_caldav_accounts_name").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(CaldavAccounts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum CaldavAccounts {
    Table,
    Id,
    Name,
    Username,
    PasswordCiphertext,
    BaseUrl,
    VerifyTls,
    Enabled,
    CreatedAt,
    UpdatedAt,
}
