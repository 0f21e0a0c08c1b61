//! Migration to create the api_request_logs table.
//!
//! The ledger is append-only. `job_run_id` and `client_id` are plain
//! references without foreign keys so that reconciling or purging job runs
//! never rewrites ledger rows.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ApiRequestLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ApiRequestLogs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ApiRequestLogs::Provider).text().not_null())
                    .col(ColumnDef::new(ApiRequestLogs::Endpoint).text().null())
                    .col(ColumnDef::new(ApiRequestLogs::Method).text().not_null())
                    .col(ColumnDef::new(ApiRequestLogs::ClientId).uuid().null())
                    .col(ColumnDef::new(ApiRequestLogs::ClientName).text().null())
                    .col(ColumnDef::new(ApiRequestLogs::JobRunId).uuid().null())
                    .col(ColumnDef::new(ApiRequestLogs::StatusCode).integer().null())
                    .col(ColumnDef::new(ApiRequestLogs::Success).boolean().not_null())
                    .col(
                        ColumnDef::new(ApiRequestLogs::ResponseTimeMs)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ApiRequestLogs::ResultsCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(ApiRequestLogs::ErrorMessage).text().null())
                    .col(ColumnDef::new(ApiRequestLogs::ErrorType).text().null())
                    .col(
                        ColumnDef::new(ApiRequestLogs::RateLimitRemaining)
                            .integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ApiRequestLogs::RateLimitReset)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ApiRequestLogs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_api_request_logs_provider_created")
                    .table(ApiRequestLogs::Table)
                    .col(ApiRequestLogs::Provider)
                    .col(ApiRequestLogs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_api_request_logs_success_created")
                    .table(ApiRequestLogs::Table)
                    .col(ApiRequestLogs::Success)
                    .col(ApiRequestLogs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_api_request_logs_job_run")
                    .table(ApiRequestLogs::Table)
                    .col(ApiRequestLogs::JobRunId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for name in [
            "idx_api_request_logs_provider_created",
            "idx_api_request_logs_success_created",
            "idx_api_request_logs_job_run",
        ] {
            manager
                .drop_index(Index::drop().name(name).to_owned())
                .await?;
        }

        manager
            .drop_table(Table::drop().table(ApiRequestLogs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ApiRequestLogs {
    Table,
    Id,
    Provider,
    Endpoint,
    Method,
    ClientId,
    ClientName,
    JobRunId,
    StatusCode,
    Success,
    ResponseTimeMs,
    ResultsCount,
    ErrorMessage,
    ErrorType,
    RateLimitRemaining,
    RateLimitReset,
    CreatedAt,
}
