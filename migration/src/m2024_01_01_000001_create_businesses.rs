//! Migration to create the businesses table.
//!
//! Businesses are the tenants of the monitoring backend; every job run and
//! every tenant-scoped API configuration belongs to exactly one of them.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Businesses::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Businesses::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Businesses::Name).text().null())
                    .col(
                        ColumnDef::new(Businesses::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Businesses::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Businesses {
    Table,
    Id,
    Name,
    CreatedAt,
}
